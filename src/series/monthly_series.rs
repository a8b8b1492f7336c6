//! Conversion of irregular daily readings into a regular monthly-maximum series.

use crate::series::error::SeriesError;
use crate::types::month::Month;
use crate::types::station::{Reading, StationReadings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Observations per year of a monthly series.
pub const MONTHLY_FREQUENCY: usize = 12;

/// Contiguous monthly maxima of a single station.
///
/// `values[i]` belongs to `start.offset(i)`. The constructor from readings
/// guarantees there are no gaps and no duplicate months.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySeries {
    station_id: String,
    start: Month,
    values: Vec<f64>,
}

impl MonthlySeries {
    /// Builds a series from already-regular values.
    pub fn new(station_id: impl Into<String>, start: Month, values: Vec<f64>) -> Self {
        Self {
            station_id: station_id.into(),
            start,
            values,
        }
    }

    /// Groups `readings` by calendar month and keeps the maximum of each month.
    ///
    /// Input order does not matter. Readings with a NaN value are ignored.
    /// When `end` is given, months after it are dropped and the series must
    /// reach exactly that month so that all stations share one forecast origin.
    ///
    /// # Errors
    ///
    /// * [`SeriesError::Empty`] if no usable reading remains.
    /// * [`SeriesError::EndMismatch`] if the last month precedes `end`.
    /// * [`SeriesError::DataGap`] naming the first month without readings.
    pub fn from_readings(
        station_id: &str,
        readings: &[Reading],
        end: Option<Month>,
    ) -> Result<Self, SeriesError> {
        let mut maxima: BTreeMap<Month, f64> = BTreeMap::new();
        for reading in readings.iter().filter(|r| !r.ozone.is_nan()) {
            let month = Month::of_date(reading.date);
            if end.is_some_and(|end| month > end) {
                continue;
            }
            maxima
                .entry(month)
                .and_modify(|max| *max = max.max(reading.ozone))
                .or_insert(reading.ozone);
        }

        let (Some(&first), Some(&last)) = (maxima.keys().next(), maxima.keys().next_back()) else {
            return Err(SeriesError::Empty {
                station: station_id.to_string(),
            });
        };

        if let Some(end) = end {
            if last < end {
                return Err(SeriesError::EndMismatch {
                    station: station_id.to_string(),
                    expected: end,
                    found: last,
                });
            }
        }

        let mut expected = first;
        let mut values = Vec::with_capacity(maxima.len());
        for (month, value) in maxima {
            if month != expected {
                return Err(SeriesError::DataGap {
                    station: station_id.to_string(),
                    missing: expected,
                });
            }
            values.push(value);
            expected = expected.succ();
        }

        Ok(Self::new(station_id, first, values))
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn start(&self) -> Month {
        self.start
    }

    /// Last month of the series, the origin of any forecast made from it.
    pub fn end(&self) -> Month {
        self.start.offset(self.values.len() as i64 - 1)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn frequency(&self) -> usize {
        MONTHLY_FREQUENCY
    }

    /// Iterates `(month, value)` pairs in chronological order.
    pub fn iter(&self) -> impl Iterator<Item = (Month, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &v)| (self.start.offset(i as i64), v))
    }
}

/// Latest month with a usable reading across all stations.
pub fn latest_month(stations: &[StationReadings]) -> Option<Month> {
    stations
        .iter()
        .flat_map(|s| s.readings.iter())
        .filter(|r| !r.ozone.is_nan())
        .map(|r| Month::of_date(r.date))
        .max()
}
