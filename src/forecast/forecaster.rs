//! Per-station forecasting with the family chosen by the selector.

use crate::forecast::error::ForecastError;
use crate::forecast::model::{ModelFamily, ModelOptions};
use crate::series::error::SeriesError;
use crate::series::monthly_series::MonthlySeries;
use crate::types::month::Month;
use crate::types::station::StationReadings;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use thiserror::Error;

/// Next-period forecast of one station, ready for spatial interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationForecast {
    pub station_id: String,
    pub longitude: f64,
    pub latitude: f64,
    /// Point forecast at the final step of the production horizon; always
    /// finite and strictly positive.
    pub forecast_value: f64,
    /// Last observed month; the forecast targets `forecast_origin + horizon`.
    pub forecast_origin: Month,
    /// Fitted structure, e.g. `ARIMA(1,0,0)(0,1,1)[12]`.
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StationForecastError {
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
}

/// Coarse reason a station dropped out of the forecast table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCategory {
    DataGap,
    NoReadings,
    EndMismatch,
    InsufficientData,
    FitFailed,
    NonPositiveForecast,
}

impl Display for SkipCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipCategory::DataGap => "data gap",
            SkipCategory::NoReadings => "no readings",
            SkipCategory::EndMismatch => "series ends early",
            SkipCategory::InsufficientData => "insufficient data",
            SkipCategory::FitFailed => "fit failed",
            SkipCategory::NonPositiveForecast => "non-positive forecast",
        })
    }
}

impl From<&StationForecastError> for SkipCategory {
    fn from(error: &StationForecastError) -> Self {
        match error {
            StationForecastError::Series(SeriesError::DataGap { .. }) => SkipCategory::DataGap,
            StationForecastError::Series(SeriesError::Empty { .. }) => SkipCategory::NoReadings,
            StationForecastError::Series(SeriesError::EndMismatch { .. }) => {
                SkipCategory::EndMismatch
            }
            StationForecastError::Forecast(ForecastError::NonPositiveForecast { .. }) => {
                SkipCategory::NonPositiveForecast
            }
            StationForecastError::Forecast(e) if e.is_insufficient_data() => {
                SkipCategory::InsufficientData
            }
            StationForecastError::Forecast(_) => SkipCategory::FitFailed,
        }
    }
}

/// A station without a usable forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSkip {
    pub station_id: String,
    pub category: SkipCategory,
    pub reason: String,
}

/// Forecasts in input station order plus the stations that were skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ForecastBatch {
    pub forecasts: Vec<StationForecast>,
    pub skipped: Vec<StationSkip>,
}

#[derive(Debug, Clone)]
pub struct Forecaster {
    family: ModelFamily,
    options: ModelOptions,
    horizon: usize,
}

impl Forecaster {
    pub fn new(family: ModelFamily, options: ModelOptions, horizon: usize) -> Self {
        Self {
            family,
            options,
            horizon: horizon.max(1),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Fits a fresh model to `series` and returns the final-step forecast.
    pub fn forecast_series(&self, series: &MonthlySeries) -> Result<(f64, String), ForecastError> {
        let fit = self.family.model(&self.options).fit(series.values())?;
        let forecast = fit.forecast(self.horizon)?;
        let value = forecast.last().ok_or(ForecastError::ZeroHorizon)?;
        if !(value.is_finite() && value > 0.0) {
            return Err(ForecastError::NonPositiveForecast { value });
        }
        Ok((value, fit.describe()))
    }

    pub fn forecast_station(
        &self,
        station: &StationReadings,
        end: Option<Month>,
    ) -> Result<StationForecast, StationForecastError> {
        let series = MonthlySeries::from_readings(&station.site.id, &station.readings, end)?;
        let (forecast_value, model) = self.forecast_series(&series)?;
        Ok(StationForecast {
            station_id: station.site.id.clone(),
            longitude: station.site.longitude,
            latitude: station.site.latitude,
            forecast_value,
            forecast_origin: series.end(),
            model,
        })
    }

    /// Forecasts every station in parallel. Failing stations are logged and
    /// reported in [`ForecastBatch::skipped`]; they never abort the batch.
    pub fn forecast_all(&self, stations: &[StationReadings], end: Option<Month>) -> ForecastBatch {
        info!(
            "Forecasting {} stations with {} ({} step horizon)",
            stations.len(),
            self.family,
            self.horizon
        );
        let outcomes: Vec<Result<StationForecast, StationSkip>> = stations
            .par_iter()
            .map(|station| {
                self.forecast_station(station, end).map_err(|error| StationSkip {
                    station_id: station.site.id.clone(),
                    category: SkipCategory::from(&error),
                    reason: error.to_string(),
                })
            })
            .collect();

        let mut batch = ForecastBatch::default();
        for outcome in outcomes {
            match outcome {
                Ok(forecast) => batch.forecasts.push(forecast),
                Err(skip) => {
                    warn!("Skipping station {}: {}", skip.station_id, skip.reason);
                    batch.skipped.push(skip);
                }
            }
        }
        info!(
            "{} station forecasts, {} stations skipped",
            batch.forecasts.len(),
            batch.skipped.len()
        );
        batch
    }
}
