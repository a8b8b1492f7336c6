mod analysis;
mod config;
mod data;
mod error;
mod forecast;
mod optim;
mod report;
mod series;
mod spatial;
mod types;
mod utils;

pub use analysis::OzoneAnalysis;
pub use config::*;
pub use error::OzoneError;
pub use report::*;

pub use data::error::DataError;
pub use data::loader::ReadingsLoader;

pub use types::month::Month;
pub use types::readings_frame::{ReadingsFrame, ReadingsSchema};
pub use types::station::*;

pub use series::error::SeriesError;
pub use series::monthly_series::*;

pub use forecast::arima::*;
pub use forecast::box_cox::*;
pub use forecast::diagnostics::*;
pub use forecast::error::*;
pub use forecast::ets::*;
pub use forecast::forecaster::*;
pub use forecast::model::*;
pub use forecast::seasonal_naive::*;
pub use forecast::selector::*;

pub use spatial::clip::*;
pub use spatial::cross_validation::*;
pub use spatial::distance::DistanceMetric;
pub use spatial::error::SpatialError;
pub use spatial::grid::*;
pub use spatial::kriging::*;
pub use spatial::matern::matern_correlation;
pub use spatial::surface::*;
pub use spatial::variogram::*;
pub use spatial::{merge_colocated, SamplePoint};
