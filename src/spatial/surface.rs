//! Fit, validate and predict for one (variant, response scale) combination,
//! and the PRESS comparison across combinations.

use crate::spatial::cross_validation::{leave_one_out, LeaveOneOut};
use crate::spatial::error::SpatialError;
use crate::spatial::kriging::{KrigingModel, KrigingPrediction, KrigingVariant, Neighbourhood, ResponseScale};
use crate::spatial::variogram::{FittedVariogram, VariogramEstimator};
use crate::spatial::SamplePoint;
use log::{debug, info, warn};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A validated kriging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceModel {
    pub variant: KrigingVariant,
    pub scale: ResponseScale,
    pub variogram: FittedVariogram,
    pub validation: LeaveOneOut,
}

impl SurfaceModel {
    pub fn press(&self) -> f64 {
        self.validation.press
    }

    /// PRESS restricted to the held-out stations in `stations`.
    pub fn press_over(&self, stations: &BTreeSet<usize>) -> f64 {
        self.validation
            .folds
            .iter()
            .filter(|f| stations.contains(&f.index))
            .map(|f| f.squared_error)
            .sum()
    }
}

/// Outcome of [`SurfaceInterpolator::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrigingRun {
    pub model: SurfaceModel,
    /// Successful predictions, in target order.
    pub predictions: Vec<KrigingPrediction>,
    pub failed_targets: usize,
}

/// A combination that could not be validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCombination {
    pub variant: KrigingVariant,
    pub scale: ResponseScale,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SurfaceInterpolator {
    estimator: VariogramEstimator,
    neighbourhood: Neighbourhood,
}

impl SurfaceInterpolator {
    pub fn new(estimator: VariogramEstimator, neighbourhood: Neighbourhood) -> Self {
        Self {
            estimator,
            neighbourhood,
        }
    }

    /// Moves raw values onto the kriging scale.
    pub fn transform(points: &[SamplePoint], scale: ResponseScale) -> Result<Vec<SamplePoint>, SpatialError> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if !(p.x.is_finite() && p.y.is_finite()) {
                    return Err(SpatialError::NonFiniteInput {
                        station: format!("#{i}"),
                    });
                }
                match scale.forward(p.value) {
                    Some(value) => Ok(SamplePoint::new(p.x, p.y, value)),
                    None if scale == ResponseScale::Log => Err(SpatialError::NonPositiveResponse {
                        station: format!("#{i}"),
                        value: p.value,
                    }),
                    None => Err(SpatialError::NonFiniteInput {
                        station: format!("#{i}"),
                    }),
                }
            })
            .collect()
    }

    /// Fits the variogram and runs leave-one-out validation for one
    /// combination. `points` carry raw values.
    pub fn fit(
        &self,
        points: &[SamplePoint],
        variant: KrigingVariant,
        scale: ResponseScale,
    ) -> Result<SurfaceModel, SpatialError> {
        let transformed = Self::transform(points, scale)?;
        let variogram = self.estimator.estimate(&transformed, variant)?;
        let validation = leave_one_out(
            &transformed,
            variant,
            scale,
            variogram.params,
            self.estimator.metric(),
            self.neighbourhood,
        )?;
        info!(
            "{variant} kriging on {scale} scale: PRESS {:.6e} ({} folds, {} failed), Matérn kappa {}",
            validation.press,
            validation.folds.len(),
            validation.failed_folds,
            variogram.params.kappa
        );
        Ok(SurfaceModel {
            variant,
            scale,
            variogram,
            validation,
        })
    }

    /// Predicts `targets` with an already validated model; failed targets are
    /// counted and left out.
    pub fn predict(
        &self,
        points: &[SamplePoint],
        model: &SurfaceModel,
        targets: &[(f64, f64)],
    ) -> Result<(Vec<KrigingPrediction>, usize), SpatialError> {
        let transformed = Self::transform(points, model.scale)?;
        let kriging = KrigingModel::new(
            &transformed,
            model.variant,
            model.scale,
            model.variogram.params,
            self.estimator.metric(),
            self.neighbourhood,
        )?;
        let mut failed = 0;
        let predictions = kriging
            .predict_all(targets)
            .into_iter()
            .filter_map(|result| match result {
                Ok(prediction) => Some(prediction),
                Err(_) => {
                    failed += 1;
                    None
                }
            })
            .collect();
        if failed > 0 {
            warn!("{failed} grid targets could not be kriged");
        }
        Ok((predictions, failed))
    }

    /// Fit, validate and predict in one call.
    pub fn run(
        &self,
        points: &[SamplePoint],
        variant: KrigingVariant,
        scale: ResponseScale,
        targets: &[(f64, f64)],
    ) -> Result<KrigingRun, SpatialError> {
        let model = self.fit(points, variant, scale)?;
        let (predictions, failed_targets) = self.predict(points, &model, targets)?;
        Ok(KrigingRun {
            model,
            predictions,
            failed_targets,
        })
    }

    /// Validates every combination; returns the validated models (in input
    /// order) and the rejected ones.
    pub fn compare(
        &self,
        points: &[SamplePoint],
        combinations: &[(KrigingVariant, ResponseScale)],
    ) -> (Vec<SurfaceModel>, Vec<RejectedCombination>) {
        let mut models = Vec::new();
        let mut rejected = Vec::new();
        for &(variant, scale) in combinations {
            match self.fit(points, variant, scale) {
                Ok(model) => models.push(model),
                Err(e) => {
                    warn!("{variant} kriging on {scale} scale rejected: {e}");
                    rejected.push(RejectedCombination {
                        variant,
                        scale,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (models, rejected)
    }
}

/// Held-out stations that every model validated successfully.
pub fn common_folds(models: &[SurfaceModel]) -> BTreeSet<usize> {
    let mut sets = models
        .iter()
        .map(|m| m.validation.folds.iter().map(|f| f.index).collect::<BTreeSet<_>>());
    let first = sets.next().unwrap_or_default();
    sets.fold(first, |acc, set| acc.intersection(&set).copied().collect())
}

/// The model with the lowest PRESS over the stations every model validated;
/// earlier models win exact ties.
///
/// Models are only comparable on the same held-out stations. When the models
/// share no successful fold, fewer failed folds rank first and PRESS breaks
/// the tie.
pub fn lowest_press(models: &[SurfaceModel]) -> Option<&SurfaceModel> {
    let common = common_folds(models);
    if common.is_empty() {
        return models
            .iter()
            .enumerate()
            .min_by_key(|(i, m)| (m.validation.failed_folds, OrderedFloat(m.press()), *i))
            .map(|(_, m)| m);
    }
    if models.iter().any(|m| m.validation.folds.len() != common.len()) {
        debug!("Comparing PRESS over the {} stations every combination validated", common.len());
    }
    models
        .iter()
        .enumerate()
        .min_by_key(|(i, m)| (OrderedFloat(m.press_over(&common)), *i))
        .map(|(_, m)| m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::cross_validation::Fold;
    use crate::spatial::grid::SpatialGrid;
    use crate::spatial::variogram::{EmpiricalVariogram, VariogramParams};

    fn stations() -> Vec<SamplePoint> {
        (0..20)
            .map(|i| {
                let x = -122.0 + (i % 5) as f64 * 0.8 + ((i * 13) % 7) as f64 * 0.05;
                let y = 36.0 + (i / 5) as f64 * 0.7 + ((i * 5) % 3) as f64 * 0.04;
                let value = 0.045 + 0.004 * (x + 122.0) - 0.002 * (y - 36.0) + 0.001 * ((i * 17) % 5) as f64 / 5.0;
                SamplePoint::new(x, y, value)
            })
            .collect()
    }

    fn interpolator() -> SurfaceInterpolator {
        SurfaceInterpolator::new(
            VariogramEstimator::builder().max_iterations(400).build(),
            Neighbourhood::Global,
        )
    }

    #[test]
    fn test_run_predicts_positive_surface() -> Result<(), SpatialError> {
        let points = stations();
        let grid = SpatialGrid::covering(&points, 0.5, 0.0)?;
        let run = interpolator().run(&points, KrigingVariant::Ordinary, ResponseScale::Log, &grid.points())?;
        assert_eq!(run.predictions.len() + run.failed_targets, grid.len());
        assert!(run.predictions.iter().all(|p| p.value > 0.0));
        assert!(run.model.press() >= 0.0);
        Ok(())
    }

    #[test]
    fn test_compare_all_combinations() {
        let points = stations();
        let combinations = [
            (KrigingVariant::Ordinary, ResponseScale::Raw),
            (KrigingVariant::Ordinary, ResponseScale::Log),
            (KrigingVariant::Universal, ResponseScale::Raw),
            (KrigingVariant::Universal, ResponseScale::Log),
        ];
        let (models, rejected) = interpolator().compare(&points, &combinations);
        assert_eq!(models.len() + rejected.len(), 4);
        let best = lowest_press(&models).expect("at least one validated model");
        let common = common_folds(&models);
        assert!(models
            .iter()
            .all(|m| best.press_over(&common) <= m.press_over(&common)));
    }

    /// A model validated on `errors`, given as `(held-out index, squared error)`,
    /// out of `stations` folds.
    fn validated(variant: KrigingVariant, stations: usize, errors: &[(usize, f64)]) -> SurfaceModel {
        let folds: Vec<Fold> = errors
            .iter()
            .map(|&(index, squared_error)| Fold {
                index,
                observed: 0.05,
                predicted: 0.05 + squared_error.sqrt(),
                squared_error,
            })
            .collect();
        SurfaceModel {
            variant,
            scale: ResponseScale::Raw,
            variogram: FittedVariogram {
                params: VariogramParams {
                    nugget: 0.0,
                    partial_sill: 1.0,
                    range: 1.0,
                    kappa: 0.5,
                },
                weighted_sse: 0.0,
                monotonic: true,
                warnings: Vec::new(),
                empirical: EmpiricalVariogram::default(),
            },
            validation: LeaveOneOut {
                variant,
                scale: ResponseScale::Raw,
                failed_folds: stations - folds.len(),
                press: folds.iter().map(|f| f.squared_error).sum(),
                folds,
            },
        }
    }

    #[test]
    fn test_lost_folds_do_not_lower_press() {
        let complete = validated(
            KrigingVariant::Ordinary,
            4,
            &[(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0)],
        );
        let partial = validated(KrigingVariant::Universal, 4, &[(0, 2.0)]);
        assert!(partial.press() < complete.press());

        let models = [partial.clone(), complete.clone()];
        assert_eq!(common_folds(&models), BTreeSet::from([0]));
        let best = lowest_press(&models).expect("two models");
        assert_eq!(best.variant, KrigingVariant::Ordinary);

        // A lower error on the shared station still wins.
        let better_partial = validated(KrigingVariant::Universal, 4, &[(0, 0.5)]);
        let models = [complete, better_partial];
        let best = lowest_press(&models).expect("two models");
        assert_eq!(best.variant, KrigingVariant::Universal);
    }

    #[test]
    fn test_disjoint_folds_rank_by_failures() {
        let mostly_failed = validated(KrigingVariant::Universal, 3, &[(2, 0.1)]);
        let one_failed = validated(KrigingVariant::Ordinary, 3, &[(0, 1.0), (1, 1.0)]);
        let models = [mostly_failed, one_failed];
        assert!(common_folds(&models).is_empty());
        let best = lowest_press(&models).expect("two models");
        assert_eq!(best.variant, KrigingVariant::Ordinary);
    }

    #[test]
    fn test_log_scale_rejects_non_positive() {
        let mut points = stations();
        points[3].value = 0.0;
        let result = SurfaceInterpolator::transform(&points, ResponseScale::Log);
        assert_eq!(
            result,
            Err(SpatialError::NonPositiveResponse {
                station: "#3".to_string(),
                value: 0.0
            })
        );
        assert!(SurfaceInterpolator::transform(&points, ResponseScale::Raw).is_ok());
    }
}
