use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("{model} needs at least {required} observations, got {actual}")]
    InsufficientData {
        model: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("{model} cannot be fitted to a constant series")]
    ConstantSeries { model: &'static str },

    #[error("Box-Cox transform requires strictly positive values")]
    NonPositiveValues,

    #[error("Series contains NaN or infinite values")]
    NonFiniteValues,

    #[error("{model} produced no admissible fit")]
    FitFailed { model: &'static str },

    #[error("Forecast horizon must be at least 1")]
    ZeroHorizon,

    #[error("Forecast {value} is not strictly positive and cannot be log-transformed")]
    NonPositiveForecast { value: f64 },
}

impl ForecastError {
    /// True for the failures that mean "this series cannot support this model":
    /// too short, degenerate, or outside the transform's domain.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientData { .. }
                | ForecastError::ConstantSeries { .. }
                | ForecastError::NonPositiveValues
                | ForecastError::NonFiniteValues
        )
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No candidate model families were configured")]
    NoCandidates,

    #[error("No candidate model produced a cross-validated error for station '{station}'")]
    NoViableCandidate { station: String },

    #[error("Representative station '{0}' has no usable monthly series")]
    RepresentativeUnavailable(String),
}
