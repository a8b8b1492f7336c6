use crate::types::month::Month;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("Station '{station}' has no usable readings")]
    Empty { station: String },

    #[error("Station '{station}' has no data for {missing}; monthly series must be contiguous")]
    DataGap { station: String, missing: Month },

    #[error("Station '{station}' ends at {found}, expected the shared end month {expected}")]
    EndMismatch {
        station: String,
        expected: Month,
        found: Month,
    },
}
