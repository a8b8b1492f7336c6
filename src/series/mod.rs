pub mod error;
pub mod monthly_series;
