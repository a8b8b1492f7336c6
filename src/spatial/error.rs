use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpatialError {
    #[error("Kriging needs at least {required} stations, got {actual}")]
    TooFewStations { required: usize, actual: usize },

    #[error("Station '{station}' has non-finite coordinates or value")]
    NonFiniteInput { station: String },

    #[error("Value {value} at station '{station}' is not strictly positive and cannot be log-transformed")]
    NonPositiveResponse { station: String, value: f64 },

    #[error("Kriging system is singular (duplicate station locations or degenerate drift)")]
    SingularSystem,

    #[error("Linear trend could not be estimated: {0}")]
    TrendFit(String),

    #[error("Grid step must be positive and finite, got {0}")]
    InvalidGridStep(f64),

    #[error("Grid bounds are empty or not finite")]
    InvalidGridBounds,

    #[error("Every leave-one-out fold failed")]
    AllFoldsFailed,

    #[error("No kriging variant and response scale combination could be validated")]
    NoValidatedSurface,
}
