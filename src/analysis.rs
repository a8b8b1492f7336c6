//! End-to-end pipeline: readings table in, clipped ozone surface out.

use crate::config::AnalysisConfig;
use crate::data::loader::ReadingsLoader;
use crate::error::OzoneError;
use crate::forecast::error::SelectionError;
use crate::forecast::forecaster::Forecaster;
use crate::forecast::selector::ModelSelector;
use crate::report::{AnalysisReport, SurfaceTable};
use crate::series::monthly_series::{latest_month, MonthlySeries};
use crate::spatial::clip::{clip_surface, BoundaryLookup, NoBoundary};
use crate::spatial::grid::SpatialGrid;
use crate::spatial::error::SpatialError;
use crate::spatial::surface::{lowest_press, SurfaceInterpolator};
use crate::spatial::variogram::VariogramEstimator;
use crate::spatial::{merge_colocated, SamplePoint};
use crate::types::month::Month;
use crate::types::readings_frame::{ReadingsFrame, ReadingsSchema};
use crate::types::station::StationReadings;
use bon::bon;
use log::{info, warn};
use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task;

/// Runs the full analysis for one configuration.
///
/// ```rust,no_run
/// # use ozone_surface::{AnalysisConfig, OzoneAnalysis, OzoneError, ReadingsFrame};
/// # fn run(readings: ReadingsFrame) -> Result<(), OzoneError> {
/// let analysis = OzoneAnalysis::new(AnalysisConfig::default())?;
/// let report = analysis.run().readings(readings).call()?;
/// println!("{}", report.summary());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OzoneAnalysis {
    config: AnalysisConfig,
    boundary: Option<Arc<dyn BoundaryLookup>>,
}

#[bon]
impl OzoneAnalysis {
    /// Validates `config` and creates an analysis without a clipping boundary.
    pub fn new(config: AnalysisConfig) -> Result<Self, OzoneError> {
        config.validate()?;
        Ok(Self {
            config,
            boundary: None,
        })
    }

    /// Clips the surface to `boundary`; without one every grid cell is kept.
    pub fn with_boundary(mut self, boundary: impl BoundaryLookup + 'static) -> Self {
        self.boundary = Some(Arc::new(boundary));
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Runs every stage on `readings`.
    ///
    /// # Arguments
    ///
    /// * `.readings(ReadingsFrame)`: **Required.** The raw readings table.
    /// * `.grid(SpatialGrid)`: Optional. Prediction grid; defaults to a grid
    ///   covering the stations with the configured step and margin.
    ///
    /// # Errors
    ///
    /// Fails on an empty table, a whitelist that removes every reading, when no
    /// station yields a forecast, when fewer than the configured minimum of
    /// stations remain for kriging and when no model candidate or kriging
    /// combination can be validated. Individual stations, folds and grid cells
    /// that fail are skipped and accounted for in the report.
    #[builder]
    pub fn run(&self, readings: ReadingsFrame, grid: Option<SpatialGrid>) -> Result<AnalysisReport, OzoneError> {
        let stations = self.collect_stations(&readings)?;
        let series_end = match self.config.series_end {
            Some(end) => end,
            None => latest_month(&stations).ok_or(OzoneError::EmptyInput)?,
        };
        info!("{} stations, series end {}", stations.len(), series_end);

        let representative = self.representative_series(&stations, series_end)?;
        let selection = ModelSelector::from_config(&self.config.forecast).select(&representative)?;

        let forecaster = Forecaster::new(
            selection.chosen,
            self.config.forecast.model.clone(),
            self.config.forecast.production_horizon,
        );
        let forecasts = forecaster.forecast_all(&stations, Some(series_end));
        if forecasts.forecasts.is_empty() {
            return Err(OzoneError::NoUsableForecasts {
                skipped: forecasts.skipped.len(),
            });
        }

        let station_points: Vec<SamplePoint> = forecasts
            .forecasts
            .iter()
            .map(|f| SamplePoint::new(f.longitude, f.latitude, f.forecast_value))
            .collect();
        let points = merge_colocated(&station_points);
        if points.len() < station_points.len() {
            warn!(
                "{} stations share coordinates with another station; their forecasts are averaged",
                station_points.len() - points.len()
            );
        }
        let required = self.config.kriging.min_stations;
        if points.len() < required {
            return Err(OzoneError::TooFewStations {
                required,
                actual: points.len(),
            });
        }

        let interpolator = SurfaceInterpolator::new(
            VariogramEstimator::from_config(&self.config.variogram),
            self.config.kriging.neighbourhood,
        );
        let (surface_models, rejected_surfaces) =
            interpolator.compare(&points, &self.config.kriging.combinations());
        let chosen_surface = lowest_press(&surface_models)
            .cloned()
            .ok_or(SpatialError::NoValidatedSurface)?;
        info!(
            "Using {} kriging on {} scale (PRESS {:.4e})",
            chosen_surface.variant,
            chosen_surface.scale,
            chosen_surface.press()
        );

        let grid = match grid {
            Some(grid) => grid,
            None => SpatialGrid::covering(
                &points,
                self.config.kriging.grid_step,
                self.config.kriging.grid_margin,
            )?,
        };
        let (predictions, failed_targets) = interpolator.predict(&points, &chosen_surface, &grid.points())?;
        let surface = match &self.boundary {
            Some(boundary) => clip_surface(&predictions, boundary.as_ref()),
            None => clip_surface(&predictions, &NoBoundary),
        };
        info!(
            "Surface of {} cells ({} predicted, {} failed)",
            surface.len(),
            predictions.len(),
            failed_targets
        );

        Ok(AnalysisReport {
            series_end,
            selection,
            forecasts,
            surface_models,
            rejected_surfaces,
            chosen_surface,
            grid,
            failed_targets,
            surface: SurfaceTable::new(surface),
        })
    }

    /// Loads and merges CSV files, then runs the analysis on the result on the
    /// blocking thread pool.
    pub async fn run_files(&self, paths: &[PathBuf], schema: ReadingsSchema) -> Result<AnalysisReport, OzoneError> {
        let readings = ReadingsLoader::new(schema).load_csv_files(paths).await?;
        let analysis = self.clone();
        task::spawn_blocking(move || analysis.run().readings(readings).call()).await?
    }

    fn collect_stations(&self, readings: &ReadingsFrame) -> Result<Vec<StationReadings>, OzoneError> {
        if readings.is_empty()? {
            return Err(OzoneError::EmptyInput);
        }
        let readings = match &self.config.station_whitelist {
            Some(whitelist) => {
                let filtered = readings.filter_stations(whitelist.as_slice());
                if filtered.is_empty()? {
                    return Err(OzoneError::WhitelistRemovedAll {
                        listed: whitelist.len(),
                    });
                }
                filtered
            }
            None => readings.clone(),
        };
        let readings = match (self.config.series_start, self.config.series_end) {
            (None, None) => readings,
            (start, end) => readings.get_range(start, end)?,
        };
        let stations = readings.collect_stations()?;
        if stations.iter().all(|s| s.readings.is_empty()) {
            return Err(OzoneError::EmptyInput);
        }
        Ok(stations)
    }

    /// The configured station, or else the longest gap-free series (first by
    /// station id on ties).
    fn representative_series(
        &self,
        stations: &[StationReadings],
        end: Month,
    ) -> Result<MonthlySeries, OzoneError> {
        if let Some(id) = &self.config.forecast.representative_station {
            let station = stations
                .iter()
                .find(|s| &s.site.id == id)
                .ok_or_else(|| SelectionError::RepresentativeUnavailable(id.clone()))?;
            return MonthlySeries::from_readings(id, &station.readings, Some(end)).map_err(|e| {
                warn!("Representative station {id} is unusable: {e}");
                SelectionError::RepresentativeUnavailable(id.clone()).into()
            });
        }
        stations
            .iter()
            .filter_map(|s| MonthlySeries::from_readings(&s.site.id, &s.readings, Some(end)).ok())
            .min_by_key(|series| Reverse(series.len()))
            .ok_or(OzoneError::NoCleanSeries { end })
    }
}
