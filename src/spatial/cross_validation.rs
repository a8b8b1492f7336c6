use crate::spatial::distance::DistanceMetric;
use crate::spatial::error::SpatialError;
use crate::spatial::kriging::{KrigingModel, KrigingVariant, Neighbourhood, ResponseScale};
use crate::spatial::variogram::VariogramParams;
use crate::spatial::SamplePoint;
use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Held-out prediction of one station, on the original scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub observed: f64,
    pub predicted: f64,
    pub squared_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveOneOut {
    pub variant: KrigingVariant,
    pub scale: ResponseScale,
    /// Successful folds in station order.
    pub folds: Vec<Fold>,
    pub failed_folds: usize,
    /// Predicted residual error sum of squares over the successful folds.
    pub press: f64,
}

impl LeaveOneOut {
    pub fn rmse(&self) -> f64 {
        (self.press / self.folds.len() as f64).sqrt()
    }
}

/// Leave-one-out cross-validation with a fixed, already fitted variogram.
///
/// `points` carry values on the kriging scale; errors are measured after
/// back-transforming both the held-out value and its prediction. Folds run in
/// parallel. Folds that cannot be solved are counted and skipped.
pub fn leave_one_out(
    points: &[SamplePoint],
    variant: KrigingVariant,
    scale: ResponseScale,
    variogram: VariogramParams,
    metric: DistanceMetric,
    neighbourhood: Neighbourhood,
) -> Result<LeaveOneOut, SpatialError> {
    let outcomes: Vec<Result<Fold, SpatialError>> = (0..points.len())
        .into_par_iter()
        .map(|held_out| {
            let training: Vec<SamplePoint> = points
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != held_out)
                .map(|(_, p)| *p)
                .collect();
            let target = points[held_out];
            let model = KrigingModel::new(&training, variant, scale, variogram, metric, neighbourhood)?;
            let prediction = model.predict(target.x, target.y)?;
            let observed = scale.inverse(target.value);
            Ok(Fold {
                index: held_out,
                observed,
                predicted: prediction.value,
                squared_error: (observed - prediction.value).powi(2),
            })
        })
        .collect();

    let mut folds = Vec::with_capacity(points.len());
    let mut failed_folds = 0;
    for outcome in outcomes {
        match outcome {
            Ok(fold) if fold.squared_error.is_finite() => folds.push(fold),
            Ok(fold) => {
                warn!("Leave-one-out fold {} produced a non-finite error", fold.index);
                failed_folds += 1;
            }
            Err(e) => {
                warn!("Leave-one-out fold failed: {e}");
                failed_folds += 1;
            }
        }
    }
    if folds.is_empty() {
        return Err(SpatialError::AllFoldsFailed);
    }
    let press = folds.iter().map(|f| f.squared_error).sum();
    Ok(LeaveOneOut {
        variant,
        scale,
        folds,
        failed_folds,
        press,
    })
}
