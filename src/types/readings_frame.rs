//! Contains the `ReadingsFrame` structure for lazy operations on the raw ozone readings table.

use crate::data::error::DataError;
use crate::types::month::Month;
use crate::types::station::{Reading, StationReadings, StationSite};
use chrono::NaiveDate;
use polars::prelude::{col, lit, Column, DataFrame, DataType, Expr, IntoLazy, LazyFrame, NamedFrom, Series};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column names of the readings table.
///
/// The defaults match the merged monitoring-network export:
/// `station_id`, `date`, `ozone`, `longitude`, `latitude`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingsSchema {
    pub station_id: String,
    pub date: String,
    pub ozone: String,
    pub longitude: String,
    pub latitude: String,
}

impl Default for ReadingsSchema {
    fn default() -> Self {
        Self {
            station_id: "station_id".to_string(),
            date: "date".to_string(),
            ozone: "ozone".to_string(),
            longitude: "longitude".to_string(),
            latitude: "latitude".to_string(),
        }
    }
}

/// A wrapper around a Polars `LazyFrame` holding one row per station-day.
///
/// Filters are applied lazily and return a new `ReadingsFrame`; the original is
/// left untouched. Call [`ReadingsFrame::collect_stations`] to materialise the
/// readings grouped per station.
#[derive(Clone)]
pub struct ReadingsFrame {
    /// The underlying Polars LazyFrame containing the readings.
    pub frame: LazyFrame,
    schema: ReadingsSchema,
}

impl ReadingsFrame {
    /// Wraps a frame that uses the default column names.
    pub fn new(frame: LazyFrame) -> Self {
        Self::with_schema(frame, ReadingsSchema::default())
    }

    pub fn with_schema(frame: LazyFrame, schema: ReadingsSchema) -> Self {
        Self { frame, schema }
    }

    pub fn from_dataframe(df: DataFrame) -> Self {
        Self::new(df.lazy())
    }

    pub fn schema(&self) -> &ReadingsSchema {
        &self.schema
    }

    /// Filters the readings based on a Polars predicate expression.
    pub fn filter(&self, predicate: Expr) -> ReadingsFrame {
        ReadingsFrame::with_schema(self.frame.clone().filter(predicate), self.schema.clone())
    }

    /// Keeps only rows whose station id is in `whitelist`.
    ///
    /// An empty whitelist removes every row.
    pub fn filter_stations<S: AsRef<str>>(&self, whitelist: &[S]) -> ReadingsFrame {
        let ids: Vec<String> = whitelist.iter().map(|id| id.as_ref().to_string()).collect();
        let listed = Series::new("whitelist".into(), ids);
        self.filter(
            col(self.schema.station_id.as_str())
                .cast(DataType::String)
                .is_in(lit(listed)),
        )
    }

    /// Whether the frame holds no rows at all. Only the first row is collected.
    pub fn is_empty(&self) -> Result<bool, DataError> {
        Ok(self.frame.clone().limit(1).collect()?.height() == 0)
    }

    /// Keeps readings from the first day of `start` through the last day of
    /// `end`. A missing bound leaves that side open.
    pub fn get_range(&self, start: Option<Month>, end: Option<Month>) -> Result<ReadingsFrame, DataError> {
        let date = || col(self.schema.date.as_str()).cast(DataType::Date);
        let from = start
            .map(|month| first_day(month).map(|day| date().gt_eq(lit(day))))
            .transpose()?;
        let until = end
            .map(|month| first_day(month.succ()).map(|day| date().lt(lit(day))))
            .transpose()?;

        Ok(match (from, until) {
            (Some(from), Some(until)) => self.filter(from.and(until)),
            (Some(bound), None) | (None, Some(bound)) => self.filter(bound),
            (None, None) => self.clone(),
        })
    }

    /// Collects the frame and groups the readings per station, ordered by station id.
    ///
    /// Rows without a station id or date, and readings whose ozone value is null
    /// or NaN, are dropped. A station keeps the first non-null coordinates seen.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingColumn`] if a schema column is absent,
    /// [`DataError::InvalidDate`] for dates not in `YYYY-MM-DD` form and
    /// [`DataError::MissingCoordinates`] for a station with no coordinates at all.
    pub fn collect_stations(&self) -> Result<Vec<StationReadings>, DataError> {
        let df = self.frame.clone().collect()?;

        let ids = typed_column(&df, &self.schema.station_id, DataType::String)?;
        let dates = typed_column(&df, &self.schema.date, DataType::String)?;
        let ozone = typed_column(&df, &self.schema.ozone, DataType::Float64)?;
        let longitudes = typed_column(&df, &self.schema.longitude, DataType::Float64)?;
        let latitudes = typed_column(&df, &self.schema.latitude, DataType::Float64)?;

        struct Pending {
            coordinates: Option<(f64, f64)>,
            readings: Vec<Reading>,
        }
        let mut pending: BTreeMap<String, Pending> = BTreeMap::new();

        let rows = ids
            .str()?
            .into_iter()
            .zip(dates.str()?.into_iter())
            .zip(ozone.f64()?.into_iter())
            .zip(longitudes.f64()?.into_iter())
            .zip(latitudes.f64()?.into_iter())
            .enumerate();

        for (row, ((((id, date), value), lon), lat)) in rows {
            let (Some(id), Some(date)) = (id, date) else {
                continue;
            };
            let entry = pending.entry(id.to_string()).or_insert_with(|| Pending {
                coordinates: None,
                readings: Vec::new(),
            });
            if entry.coordinates.is_none() {
                if let (Some(lon), Some(lat)) = (lon, lat) {
                    entry.coordinates = Some((lon, lat));
                }
            }
            let Some(value) = value.filter(|v| !v.is_nan()) else {
                continue;
            };
            let date = parse_date(date).ok_or_else(|| DataError::InvalidDate {
                row,
                value: date.to_string(),
            })?;
            entry.readings.push(Reading::new(id, date, value));
        }

        pending
            .into_iter()
            .map(|(id, station)| {
                let (longitude, latitude) = station
                    .coordinates
                    .ok_or_else(|| DataError::MissingCoordinates {
                        station: id.clone(),
                    })?;
                Ok(StationReadings {
                    site: StationSite::new(id, longitude, latitude),
                    readings: station.readings,
                })
            })
            .collect()
    }
}

fn first_day(month: Month) -> Result<NaiveDate, DataError> {
    NaiveDate::from_ymd_opt(month.year(), month.month(), 1).ok_or(DataError::InvalidMonth(month))
}

// Date columns cast to String render as ISO dates; datetimes carry a time suffix.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn typed_column(df: &DataFrame, name: &str, dtype: DataType) -> Result<Column, DataError> {
    df.column(name)
        .map_err(|e| DataError::MissingColumn {
            column: name.to_string(),
            source: e,
        })?
        .cast(&dtype)
        .map_err(DataError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn sample_frame() -> Result<ReadingsFrame, PolarsError> {
        let df = df!(
            "station_id" => &["A", "A", "A", "B", "B", "C"],
            "date" => &["2020-01-03", "2020-01-20", "2020-02-11", "2020-01-05", "2020-03-01", "2019-12-31"],
            "ozone" => &[Some(0.041), Some(0.047), None, Some(0.052), Some(0.050), Some(0.039)],
            "longitude" => &[-118.2, -118.2, -118.2, -121.9, -121.9, -117.1],
            "latitude" => &[34.1, 34.1, 34.1, 37.3, 37.3, 32.7],
        )?;
        Ok(ReadingsFrame::from_dataframe(df))
    }

    #[test]
    fn test_collect_groups_per_station() -> Result<(), Box<dyn std::error::Error>> {
        let stations = sample_frame()?.collect_stations()?;
        let ids: Vec<&str> = stations.iter().map(|s| s.site.id.as_str()).collect();
        assert_eq!(ids, ["A", "B", "C"]);

        // The null reading of A is dropped, the station itself is kept.
        assert_eq!(stations[0].readings.len(), 2);
        assert_eq!(stations[0].site.longitude, -118.2);
        assert_eq!(stations[1].readings.len(), 2);
        Ok(())
    }

    #[test]
    fn test_filter_stations_whitelist() -> Result<(), Box<dyn std::error::Error>> {
        let stations = sample_frame()?.filter_stations(&["A", "C"]).collect_stations()?;
        assert_eq!(stations.len(), 2);
        assert!(stations.iter().all(|s| s.site.id != "B"));

        let none = sample_frame()?.filter_stations::<&str>(&[]);
        assert!(none.is_empty()?);
        assert!(none.collect_stations()?.is_empty());
        assert!(!sample_frame()?.is_empty()?);
        Ok(())
    }

    #[test]
    fn test_whitelist_of_24_drops_unlisted_station() -> Result<(), Box<dyn std::error::Error>> {
        let mut ids = Vec::new();
        let mut dates = Vec::new();
        let mut values = Vec::new();
        let mut lons = Vec::new();
        let mut lats = Vec::new();
        for station in 0..25 {
            for day in 1..=3 {
                ids.push(format!("S{station:02}"));
                dates.push(format!("2021-05-{day:02}"));
                values.push(0.04 + station as f64 * 0.001);
                lons.push(-120.0 + station as f64 * 0.1);
                lats.push(36.0 + station as f64 * 0.05);
            }
        }
        let df = df!(
            "station_id" => ids,
            "date" => dates,
            "ozone" => values,
            "longitude" => lons,
            "latitude" => lats,
        )?;
        let whitelist: Vec<String> = (0..24).map(|s| format!("S{s:02}")).collect();

        let stations = ReadingsFrame::from_dataframe(df)
            .filter_stations(&whitelist)
            .collect_stations()?;
        assert_eq!(stations.len(), 24);
        assert!(stations.iter().all(|s| s.site.id != "S24"));
        Ok(())
    }

    #[test]
    fn test_get_range_by_month() -> Result<(), Box<dyn std::error::Error>> {
        let stations = sample_frame()?
            .get_range(Some(Month::new(1, 2020)), Some(Month::new(1, 2020)))?
            .collect_stations()?;
        let total: usize = stations.iter().map(|s| s.readings.len()).sum();
        // A has two January readings, B one; C's December reading is outside.
        assert_eq!(total, 3);
        assert!(stations
            .iter()
            .flat_map(|s| s.readings.iter())
            .all(|r| Month::of_date(r.date) == Month::new(1, 2020)));

        let until_december = sample_frame()?
            .get_range(None, Some(Month::new(12, 2019)))?
            .collect_stations()?;
        assert!(until_december
            .iter()
            .flat_map(|s| s.readings.iter())
            .all(|r| Month::of_date(r.date) <= Month::new(12, 2019)));
        assert!(!until_december.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_column_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let df = df!(
            "station_id" => &["A"],
            "date" => &["2020-01-01"],
            "ozone" => &[0.04],
            "longitude" => &[-118.0],
        )?;
        let err = ReadingsFrame::from_dataframe(df)
            .collect_stations()
            .unwrap_err();
        assert!(matches!(err, DataError::MissingColumn { ref column, .. } if column == "latitude"));
        Ok(())
    }

    #[test]
    fn test_invalid_date_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let df = df!(
            "station_id" => &["A"],
            "date" => &["03/01/2020"],
            "ozone" => &[0.04],
            "longitude" => &[-118.0],
            "latitude" => &[34.0],
        )?;
        let err = ReadingsFrame::from_dataframe(df)
            .collect_stations()
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidDate { row: 0, .. }));
        Ok(())
    }
}
