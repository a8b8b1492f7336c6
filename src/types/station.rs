//! Monitoring station and raw reading records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single raw ozone measurement as delivered by the monitoring network.
///
/// Readings arrive at an irregular (usually daily) cadence, several per month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Station identifier, e.g. "06-037-1103".
    pub station_id: String,
    /// Calendar day of the measurement.
    pub date: NaiveDate,
    /// Measured ozone concentration in ppm.
    pub ozone: f64,
}

impl Reading {
    pub fn new(station_id: impl Into<String>, date: NaiveDate, ozone: f64) -> Self {
        Self {
            station_id: station_id.into(),
            date,
            ozone,
        }
    }
}

/// Location of a monitoring station.
///
/// Coordinates are decimal degrees; `longitude` is used as the x coordinate and
/// `latitude` as the y coordinate throughout the spatial stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSite {
    pub id: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl StationSite {
    pub fn new(id: impl Into<String>, longitude: f64, latitude: f64) -> Self {
        Self {
            id: id.into(),
            longitude,
            latitude,
        }
    }
}

/// All readings of one station together with its location.
#[derive(Debug, Clone)]
pub struct StationReadings {
    pub site: StationSite,
    pub readings: Vec<Reading>,
}
