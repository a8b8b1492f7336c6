use crate::types::month::Month;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("No input files were given")]
    NoFiles,

    #[error("I/O error reading CSV file '{0}'")]
    CsvReadIo(PathBuf, #[source] std::io::Error),

    #[error("Parsing error reading CSV file '{0}'")]
    CsvReadPolars(PathBuf, #[source] PolarsError),

    #[error("Required column '{column}' not found in readings table")]
    MissingColumn {
        column: String,
        #[source]
        source: PolarsError,
    },

    #[error("Month {0} is not a valid calendar month")]
    InvalidMonth(Month),

    #[error("Unparseable date '{value}' in row {row}")]
    InvalidDate { row: usize, value: String },

    #[error("Station '{station}' has no usable coordinates")]
    MissingCoordinates { station: String },

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
