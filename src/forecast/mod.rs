pub mod arima;
pub mod box_cox;
pub mod diagnostics;
pub mod error;
pub mod ets;
pub mod forecaster;
pub mod model;
pub mod seasonal_naive;
pub mod selector;
