//! Outputs of a full analysis run: the surface and forecast tables, the model
//! comparisons behind them, and a plain-text account of what was skipped.

use crate::forecast::forecaster::{ForecastBatch, SkipCategory, StationForecast};
use crate::forecast::selector::ModelSelection;
use crate::spatial::clip::SurfacePoint;
use crate::spatial::grid::SpatialGrid;
use crate::spatial::surface::{common_folds, RejectedCombination, SurfaceModel};
use crate::types::month::Month;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Clipped surface cells in grid order (x varying fastest).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SurfaceTable {
    pub points: Vec<SurfacePoint>,
}

impl SurfaceTable {
    pub fn new(points: Vec<SurfacePoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Columns `x`, `y`, `predicted`, `variance`, `region`.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        df!(
            "x" => self.points.iter().map(|p| p.x).collect::<Vec<_>>(),
            "y" => self.points.iter().map(|p| p.y).collect::<Vec<_>>(),
            "predicted" => self.points.iter().map(|p| p.predicted).collect::<Vec<_>>(),
            "variance" => self.points.iter().map(|p| p.variance).collect::<Vec<_>>(),
            "region" => self.points.iter().map(|p| p.region.clone()).collect::<Vec<_>>(),
        )
    }
}

/// Columns `station_id`, `forecast`, `longitude`, `latitude`, `origin`, `model`.
pub fn forecast_frame(forecasts: &[StationForecast]) -> PolarsResult<DataFrame> {
    df!(
        "station_id" => forecasts.iter().map(|f| f.station_id.clone()).collect::<Vec<_>>(),
        "forecast" => forecasts.iter().map(|f| f.forecast_value).collect::<Vec<_>>(),
        "longitude" => forecasts.iter().map(|f| f.longitude).collect::<Vec<_>>(),
        "latitude" => forecasts.iter().map(|f| f.latitude).collect::<Vec<_>>(),
        "origin" => forecasts.iter().map(|f| f.forecast_origin.to_string()).collect::<Vec<_>>(),
        "model" => forecasts.iter().map(|f| f.model.clone()).collect::<Vec<_>>(),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Last month shared by every station series.
    pub series_end: Month,
    pub selection: ModelSelection,
    pub forecasts: ForecastBatch,
    /// Every validated (variant, scale) combination, in configured order.
    pub surface_models: Vec<SurfaceModel>,
    pub rejected_surfaces: Vec<RejectedCombination>,
    /// The combination with the lowest PRESS over the stations every
    /// combination validated, used for the surface.
    pub chosen_surface: SurfaceModel,
    pub grid: SpatialGrid,
    /// Grid targets the chosen model could not solve.
    pub failed_targets: usize,
    pub surface: SurfaceTable,
}

impl AnalysisReport {
    pub fn forecast_table(&self) -> PolarsResult<DataFrame> {
        forecast_frame(&self.forecasts.forecasts)
    }

    /// One row per validated combination: `variant`, `scale`, `press`,
    /// `shared_press` (over the stations every combination validated),
    /// `folds`, `failed_folds`, `kappa`.
    pub fn press_table(&self) -> PolarsResult<DataFrame> {
        let models = &self.surface_models;
        let common = common_folds(models);
        df!(
            "variant" => models.iter().map(|m| m.variant.to_string()).collect::<Vec<_>>(),
            "scale" => models.iter().map(|m| m.scale.to_string()).collect::<Vec<_>>(),
            "press" => models.iter().map(|m| m.press()).collect::<Vec<_>>(),
            "shared_press" => models.iter().map(|m| m.press_over(&common)).collect::<Vec<_>>(),
            "folds" => models.iter().map(|m| m.validation.folds.len() as u32).collect::<Vec<_>>(),
            "failed_folds" => models.iter().map(|m| m.validation.failed_folds as u32).collect::<Vec<_>>(),
            "kappa" => models.iter().map(|m| m.variogram.params.kappa).collect::<Vec<_>>(),
        )
    }

    /// Skipped stations per reason.
    pub fn skipped_by_category(&self) -> BTreeMap<SkipCategory, Vec<&str>> {
        let mut grouped: BTreeMap<SkipCategory, Vec<&str>> = BTreeMap::new();
        for skip in &self.forecasts.skipped {
            grouped
                .entry(skip.category)
                .or_default()
                .push(skip.station_id.as_str());
        }
        grouped
    }

    /// Leave-one-out folds skipped by the chosen surface model.
    pub fn skipped_folds(&self) -> usize {
        self.chosen_surface.validation.failed_folds
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable account of the run, including every skipped station,
    /// skipped fold and rejected kriging combination with its reason.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let chosen = self.selection.chosen_report();
        let _ = writeln!(
            out,
            "Model: {} selected on station {} (cross-validated MSE {})",
            self.selection.chosen,
            self.selection.station_id,
            chosen
                .and_then(|c| c.mse)
                .map_or_else(|| "undefined".to_string(), |mse| format!("{mse:.4e}"))
        );
        for candidate in &self.selection.candidates {
            let whiteness = match &candidate.ljung_box {
                Some(test) if test.passed => format!("white residuals (p = {:.3})", test.p_value),
                Some(test) => format!("autocorrelated residuals (p = {:.3})", test.p_value),
                None => "no residual test".to_string(),
            };
            let _ = writeln!(
                out,
                "  {}: MSE {}, {}",
                candidate.structure.as_deref().unwrap_or(candidate.family.name()),
                candidate
                    .mse
                    .map_or_else(|| "undefined".to_string(), |mse| format!("{mse:.4e}")),
                whiteness
            );
        }

        let _ = writeln!(
            out,
            "Forecasts from {}: {} stations, {} skipped",
            self.series_end,
            self.forecasts.forecasts.len(),
            self.forecasts.skipped.len()
        );
        for (category, stations) in self.skipped_by_category() {
            let _ = writeln!(out, "  {category}: {} ({})", stations.len(), stations.join(", "));
        }

        let surface = &self.chosen_surface;
        let _ = writeln!(
            out,
            "Surface: {} kriging on {} scale, Matérn kappa {}, PRESS {:.4e}",
            surface.variant,
            surface.scale,
            surface.variogram.params.kappa,
            surface.press()
        );
        let _ = writeln!(
            out,
            "  leave-one-out: {} folds, {} skipped; compared over {} shared stations",
            surface.validation.folds.len(),
            self.skipped_folds(),
            common_folds(&self.surface_models).len()
        );
        for warning in &surface.variogram.warnings {
            let _ = writeln!(out, "  variogram warning: {warning}");
        }
        for model in &self.surface_models {
            if model.variant != surface.variant || model.scale != surface.scale {
                let _ = writeln!(
                    out,
                    "  {} / {}: PRESS {:.4e}, {} folds skipped",
                    model.variant,
                    model.scale,
                    model.press(),
                    model.validation.failed_folds
                );
            }
        }
        for rejected in &self.rejected_surfaces {
            let _ = writeln!(
                out,
                "  {} / {} rejected: {}",
                rejected.variant, rejected.scale, rejected.reason
            );
        }

        let (nx, ny) = self.grid.dimensions();
        let _ = write!(
            out,
            "Grid: {nx} x {ny} cells at step {}, {} failed, {} kept after clipping",
            self.grid.step(),
            self.failed_targets,
            self.surface.len()
        );
        out
    }
}
