//! Analysis configuration, loadable from JSON and constructible with builders.

use crate::forecast::model::{ModelFamily, ModelOptions};
use crate::spatial::distance::DistanceMetric;
use crate::spatial::kriging::{KrigingVariant, Neighbourhood, ResponseScale};
use crate::types::month::Month;
use bon::Builder;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse configuration")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct ForecastConfig {
    #[builder(default = ModelFamily::default_candidates())]
    pub candidates: Vec<ModelFamily>,
    #[builder(default)]
    pub model: ModelOptions,
    /// Steps ahead scored by rolling-origin cross-validation.
    #[builder(default = 1)]
    pub evaluation_horizon: usize,
    /// Steps ahead of the per-station forecast that is interpolated.
    #[builder(default = 1)]
    pub production_horizon: usize,
    #[builder(default = 0.05)]
    pub ljung_box_significance: f64,
    /// Shortest training window for cross-validation origins. Zero tries every
    /// origin and lets too-short fits fail.
    #[builder(default)]
    pub cv_min_window: usize,
    /// Station whose series drives model selection; defaults to the longest
    /// gap-free series.
    pub representative_station: Option<String>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct VariogramConfig {
    #[builder(default = 15)]
    pub n_lags: usize,
    /// Cutoff as a fraction of the bounding-box diagonal.
    #[builder(default = 1.0 / 3.0)]
    pub cutoff_fraction: f64,
    /// Absolute cutoff; overrides `cutoff_fraction`.
    pub cutoff: Option<f64>,
    #[builder(default = vec![0.5, 1.0, 1.5, 2.5, 5.0])]
    pub kappas: Vec<f64>,
    #[builder(default = 2000)]
    pub max_optimizer_iterations: usize,
    #[builder(default)]
    pub distance: DistanceMetric,
}

impl Default for VariogramConfig {
    fn default() -> Self {
        VariogramConfig::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct KrigingConfig {
    #[builder(default = vec![KrigingVariant::Ordinary, KrigingVariant::Universal])]
    pub variants: Vec<KrigingVariant>,
    #[builder(default = vec![ResponseScale::Log, ResponseScale::Raw])]
    pub scales: Vec<ResponseScale>,
    #[builder(default)]
    pub neighbourhood: Neighbourhood,
    /// Grid spacing in coordinate units.
    #[builder(default = 0.1)]
    pub grid_step: f64,
    /// Extra border around the station bounding box.
    #[builder(default = 0.0)]
    pub grid_margin: f64,
    #[builder(default = 3)]
    pub min_stations: usize,
}

impl Default for KrigingConfig {
    fn default() -> Self {
        KrigingConfig::builder().build()
    }
}

impl KrigingConfig {
    /// Every configured (variant, scale) pair, variants outermost.
    pub fn combinations(&self) -> Vec<(KrigingVariant, ResponseScale)> {
        self.variants
            .iter()
            .flat_map(|v| self.scales.iter().map(move |s| (*v, *s)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct AnalysisConfig {
    #[builder(default)]
    pub forecast: ForecastConfig,
    #[builder(default)]
    pub variogram: VariogramConfig,
    #[builder(default)]
    pub kriging: KrigingConfig,
    /// First month of readings to use; earlier readings are dropped before any
    /// series is built.
    pub series_start: Option<Month>,
    /// Shared last month of every station series; defaults to the latest month
    /// observed anywhere. Later readings are dropped.
    pub series_end: Option<Month>,
    /// Stations to keep; `None` keeps all.
    pub station_whitelist: Option<Vec<String>>,
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_json_str(&json)
    }

    /// Rejects values no run could succeed with. A mismatch between the
    /// evaluation and production horizons is allowed but logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.forecast;
        if f.candidates.is_empty() {
            return Err(invalid("forecast.candidates", "at least one model family is required"));
        }
        if f.evaluation_horizon == 0 {
            return Err(invalid("forecast.evaluation_horizon", "must be at least 1"));
        }
        if f.production_horizon == 0 {
            return Err(invalid("forecast.production_horizon", "must be at least 1"));
        }
        if !(f.ljung_box_significance > 0.0 && f.ljung_box_significance < 1.0) {
            return Err(invalid("forecast.ljung_box_significance", "must lie in (0, 1)"));
        }
        if f.model.period == 0 {
            return Err(invalid("forecast.model.period", "must be at least 1"));
        }
        if !(f.model.interval_level > 0.0 && f.model.interval_level < 1.0) {
            return Err(invalid("forecast.model.interval_level", "must lie in (0, 1)"));
        }
        if f.model.max_optimizer_iterations == 0 {
            return Err(invalid("forecast.model.max_optimizer_iterations", "must be at least 1"));
        }
        if f.evaluation_horizon != f.production_horizon {
            warn!(
                "Models are scored on {}-step forecasts but the surface uses {}-step forecasts",
                f.evaluation_horizon, f.production_horizon
            );
        }

        let v = &self.variogram;
        if v.n_lags == 0 {
            return Err(invalid("variogram.n_lags", "must be at least 1"));
        }
        if !(v.cutoff_fraction > 0.0 && v.cutoff_fraction.is_finite()) {
            return Err(invalid("variogram.cutoff_fraction", "must be positive"));
        }
        if v.cutoff.is_some_and(|c| !(c > 0.0 && c.is_finite())) {
            return Err(invalid("variogram.cutoff", "must be positive"));
        }
        if v.kappas.is_empty() || v.kappas.iter().any(|k| !(*k > 0.0 && k.is_finite())) {
            return Err(invalid("variogram.kappas", "need at least one positive shape"));
        }
        if v.max_optimizer_iterations == 0 {
            return Err(invalid("variogram.max_optimizer_iterations", "must be at least 1"));
        }

        let k = &self.kriging;
        if k.variants.is_empty() || k.scales.is_empty() {
            return Err(invalid("kriging", "at least one variant and one scale are required"));
        }
        if !(k.grid_step > 0.0 && k.grid_step.is_finite()) {
            return Err(invalid("kriging.grid_step", "must be positive"));
        }
        if !(k.grid_margin >= 0.0 && k.grid_margin.is_finite()) {
            return Err(invalid("kriging.grid_margin", "must be non-negative"));
        }
        if k.min_stations < 3 {
            return Err(invalid("kriging.min_stations", "must be at least 3"));
        }
        if let Neighbourhood::Nearest(n) = k.neighbourhood {
            if n < 3 {
                return Err(invalid("kriging.neighbourhood", "needs at least 3 neighbours"));
            }
        }
        if let (Some(start), Some(end)) = (self.series_start, self.series_end) {
            if start > end {
                return Err(invalid("series_start", format!("{start} is after series_end {end}")));
            }
        }
        if self
            .station_whitelist
            .as_ref()
            .is_some_and(|list| list.is_empty())
        {
            return Err(invalid("station_whitelist", "must not be empty when given"));
        }
        Ok(())
    }
}
