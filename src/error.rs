use crate::config::ConfigError;
use crate::data::error::DataError;
use crate::forecast::error::{ForecastError, SelectionError};
use crate::series::error::SeriesError;
use crate::spatial::error::SpatialError;
use crate::types::month::Month;
use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OzoneError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed building output table")]
    Table(#[from] PolarsError),

    #[error("Analysis task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("The readings table contains no usable rows")]
    EmptyInput,

    #[error("The station whitelist ({listed} stations) removed every reading")]
    WhitelistRemovedAll { listed: usize },

    #[error("No station has a gap-free monthly series ending at {end}")]
    NoCleanSeries { end: Month },

    #[error("No station produced a usable forecast ({skipped} skipped)")]
    NoUsableForecasts { skipped: usize },

    #[error("Kriging needs at least {required} stations with forecasts, found {actual}")]
    TooFewStations { required: usize, actual: usize },
}
