//! Ordinary and universal kriging in covariance form.
//!
//! Both variants solve
//!
//! ```text
//! [ C  F ] [ λ ]   [ c₀ ]
//! [ Fᵀ 0 ] [ μ ] = [ f₀ ]
//! ```
//!
//! where `F` holds the drift basis at the stations (`[1]` for ordinary,
//! `[1, x, y]` for universal kriging). The prediction is `λᵀz` and the kriging
//! variance `C(0) - λᵀc₀ - μᵀf₀`, floored at zero.
//!
//! The nugget enters only the diagonal of `C`, so two stations at the same
//! location stay distinguishable whenever the nugget is positive.

use crate::spatial::distance::DistanceMetric;
use crate::spatial::error::SpatialError;
use crate::spatial::variogram::VariogramParams;
use crate::spatial::SamplePoint;
use nalgebra::{DMatrix, DVector, Dyn, LU};
use rayon::prelude::*;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrigingVariant {
    /// Unknown constant mean.
    Ordinary,
    /// Mean linear in the coordinates.
    Universal,
}

impl KrigingVariant {
    pub fn drift_terms(&self) -> usize {
        match self {
            KrigingVariant::Ordinary => 1,
            KrigingVariant::Universal => 3,
        }
    }

    fn drift(&self, x: f64, y: f64) -> Vec<f64> {
        match self {
            KrigingVariant::Ordinary => vec![1.0],
            KrigingVariant::Universal => vec![1.0, x, y],
        }
    }

    /// Smallest station count for which the system can be non-singular.
    pub fn min_stations(&self) -> usize {
        self.drift_terms() + 1
    }
}

impl Display for KrigingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KrigingVariant::Ordinary => "ordinary",
            KrigingVariant::Universal => "universal",
        })
    }
}

/// Scale on which the variogram is fitted and kriging is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseScale {
    Raw,
    /// Natural log; predictions are back-transformed with `exp` (no bias
    /// correction).
    Log,
}

impl ResponseScale {
    pub fn forward(&self, value: f64) -> Option<f64> {
        match self {
            ResponseScale::Raw => value.is_finite().then_some(value),
            ResponseScale::Log => (value.is_finite() && value > 0.0).then(|| value.ln()),
        }
    }

    pub fn inverse(&self, value: f64) -> f64 {
        match self {
            ResponseScale::Raw => value,
            ResponseScale::Log => value.exp(),
        }
    }
}

impl Display for ResponseScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseScale::Raw => "raw",
            ResponseScale::Log => "log",
        })
    }
}

/// Which stations enter each prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighbourhood {
    /// Every station; the system is factorised once.
    #[default]
    Global,
    /// The `k` nearest stations to each target. With the haversine metric,
    /// neighbours are ranked on an equirectangular projection centred on the
    /// stations' mean latitude.
    Nearest(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KrigingPrediction {
    pub x: f64,
    pub y: f64,
    /// Prediction on the kriging scale.
    pub prediction: f64,
    /// Kriging variance on the kriging scale.
    pub variance: f64,
    /// Prediction back-transformed to the original scale.
    pub value: f64,
}

/// Station position stored in the R-tree with its index into the point list.
#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedSite {
    index: usize,
    position: [f64; 2],
}

impl RTreeObject for IndexedSite {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedSite {
    /// Squared planar distance on the projected coordinates.
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

enum Solver {
    Global(LU<f64, Dyn, Dyn>),
    Local {
        k: usize,
        tree: RTree<IndexedSite>,
        reference_latitude: f64,
    },
}

/// A kriging predictor bound to one set of stations and one variogram.
pub struct KrigingModel {
    points: Vec<SamplePoint>,
    variant: KrigingVariant,
    scale: ResponseScale,
    variogram: VariogramParams,
    metric: DistanceMetric,
    solver: Solver,
}

impl KrigingModel {
    /// `points` carry values already on the kriging scale.
    pub fn new(
        points: &[SamplePoint],
        variant: KrigingVariant,
        scale: ResponseScale,
        variogram: VariogramParams,
        metric: DistanceMetric,
        neighbourhood: Neighbourhood,
    ) -> Result<Self, SpatialError> {
        if points.len() < variant.min_stations() {
            return Err(SpatialError::TooFewStations {
                required: variant.min_stations(),
                actual: points.len(),
            });
        }
        let solver = match neighbourhood {
            Neighbourhood::Nearest(k) if k < points.len() => {
                let reference_latitude = points.iter().map(|p| p.y).sum::<f64>() / points.len() as f64;
                Solver::Local {
                    k: k.max(variant.min_stations()),
                    tree: RTree::bulk_load(
                        points
                            .iter()
                            .enumerate()
                            .map(|(index, p)| IndexedSite {
                                index,
                                position: metric.project(p.position(), reference_latitude),
                            })
                            .collect(),
                    ),
                    reference_latitude,
                }
            }
            _ => {
                let lu = system_matrix(points, variant, &variogram, metric).lu();
                if !lu.is_invertible() {
                    return Err(SpatialError::SingularSystem);
                }
                Solver::Global(lu)
            }
        };
        Ok(Self {
            points: points.to_vec(),
            variant,
            scale,
            variogram,
            metric,
            solver,
        })
    }

    pub fn variant(&self) -> KrigingVariant {
        self.variant
    }

    pub fn scale(&self) -> ResponseScale {
        self.scale
    }

    pub fn predict(&self, x: f64, y: f64) -> Result<KrigingPrediction, SpatialError> {
        let (prediction, variance) = match &self.solver {
            Solver::Global(lu) => solve_at(lu, &self.points, self.variant, &self.variogram, self.metric, x, y)?,
            Solver::Local {
                k,
                tree,
                reference_latitude,
            } => {
                let local: Vec<SamplePoint> = tree
                    .nearest_neighbor_iter(&self.metric.project([x, y], *reference_latitude))
                    .take(*k)
                    .map(|site| self.points[site.index])
                    .collect();
                let lu = system_matrix(&local, self.variant, &self.variogram, self.metric).lu();
                solve_at(&lu, &local, self.variant, &self.variogram, self.metric, x, y)?
            }
        };
        Ok(KrigingPrediction {
            x,
            y,
            prediction,
            variance,
            value: self.scale.inverse(prediction),
        })
    }

    /// Predicts every target in parallel, preserving target order.
    pub fn predict_all(&self, targets: &[(f64, f64)]) -> Vec<Result<KrigingPrediction, SpatialError>> {
        targets
            .par_iter()
            .map(|&(x, y)| self.predict(x, y))
            .collect()
    }
}

fn system_matrix(
    points: &[SamplePoint],
    variant: KrigingVariant,
    variogram: &VariogramParams,
    metric: DistanceMetric,
) -> DMatrix<f64> {
    let n = points.len();
    let p = variant.drift_terms();
    let mut a = DMatrix::zeros(n + p, n + p);
    for i in 0..n {
        for j in i..n {
            let c = if i == j {
                variogram.sill()
            } else {
                variogram.station_covariance(metric.distance(points[i].position(), points[j].position()))
            };
            a[(i, j)] = c;
            a[(j, i)] = c;
        }
        for (k, f) in variant.drift(points[i].x, points[i].y).into_iter().enumerate() {
            a[(i, n + k)] = f;
            a[(n + k, i)] = f;
        }
    }
    a
}

fn solve_at(
    lu: &LU<f64, Dyn, Dyn>,
    points: &[SamplePoint],
    variant: KrigingVariant,
    variogram: &VariogramParams,
    metric: DistanceMetric,
    x: f64,
    y: f64,
) -> Result<(f64, f64), SpatialError> {
    let n = points.len();
    let drift = variant.drift(x, y);
    let rhs = DVector::from_iterator(
        n + drift.len(),
        points
            .iter()
            .map(|p| variogram.covariance(metric.distance(p.position(), [x, y])))
            .chain(drift),
    );
    let weights = lu.solve(&rhs).ok_or(SpatialError::SingularSystem)?;
    let prediction: f64 = points.iter().zip(weights.iter()).map(|(p, w)| p.value * w).sum();
    let variance = (variogram.sill() - weights.dot(&rhs)).max(0.0);
    if !prediction.is_finite() {
        return Err(SpatialError::SingularSystem);
    }
    Ok((prediction, variance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VariogramParams {
        VariogramParams {
            nugget: 0.0,
            partial_sill: 1.0,
            range: 1.0,
            kappa: 0.5,
        }
    }

    fn triangle(values: [f64; 3]) -> Vec<SamplePoint> {
        vec![
            SamplePoint::new(0.0, 0.0, values[0]),
            SamplePoint::new(1.0, 0.0, values[1]),
            SamplePoint::new(0.5, 1.0, values[2]),
        ]
    }

    #[test]
    fn test_ordinary_centroid_within_range() -> Result<(), SpatialError> {
        let points = triangle([0.04, 0.05, 0.06]);
        let model = KrigingModel::new(
            &points,
            KrigingVariant::Ordinary,
            ResponseScale::Raw,
            params(),
            DistanceMetric::Euclidean,
            Neighbourhood::Global,
        )?;
        let centroid = model.predict(0.5, 1.0 / 3.0)?;
        assert!(centroid.value >= 0.04 && centroid.value <= 0.06, "{centroid:?}");
        assert!(centroid.variance > 0.0);
        Ok(())
    }

    #[test]
    fn test_exact_at_stations_without_nugget() -> Result<(), SpatialError> {
        let points = triangle([1.0, 3.0, 2.0]);
        let model = KrigingModel::new(
            &points,
            KrigingVariant::Ordinary,
            ResponseScale::Raw,
            params(),
            DistanceMetric::Euclidean,
            Neighbourhood::Global,
        )?;
        for p in &points {
            let at = model.predict(p.x, p.y)?;
            assert!((at.prediction - p.value).abs() < 1e-9);
            assert!(at.variance < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_constant_field_reproduced() -> Result<(), SpatialError> {
        let points: Vec<SamplePoint> = (0..9)
            .map(|i| SamplePoint::new((i % 3) as f64, (i / 3) as f64, 0.05))
            .collect();
        for variant in [KrigingVariant::Ordinary, KrigingVariant::Universal] {
            let model = KrigingModel::new(
                &points,
                variant,
                ResponseScale::Raw,
                params(),
                DistanceMetric::Euclidean,
                Neighbourhood::Global,
            )?;
            let p = model.predict(0.7, 1.4)?;
            assert!((p.prediction - 0.05).abs() < 1e-9, "{variant}: {p:?}");
        }
        Ok(())
    }

    #[test]
    fn test_universal_reproduces_plane() -> Result<(), SpatialError> {
        let points: Vec<SamplePoint> = (0..9)
            .map(|i| {
                let (x, y) = ((i % 3) as f64, (i / 3) as f64);
                SamplePoint::new(x, y, 1.0 + 2.0 * x - 0.5 * y)
            })
            .collect();
        let model = KrigingModel::new(
            &points,
            KrigingVariant::Universal,
            ResponseScale::Raw,
            params(),
            DistanceMetric::Euclidean,
            Neighbourhood::Global,
        )?;
        let p = model.predict(3.5, -1.0)?;
        assert!((p.prediction - (1.0 + 7.0 + 0.5)).abs() < 1e-8, "{p:?}");
        Ok(())
    }

    #[test]
    fn test_log_scale_back_transform() -> Result<(), SpatialError> {
        let points: Vec<SamplePoint> = triangle([0.04, 0.05, 0.06])
            .into_iter()
            .map(|p| SamplePoint::new(p.x, p.y, p.value.ln()))
            .collect();
        let model = KrigingModel::new(
            &points,
            KrigingVariant::Ordinary,
            ResponseScale::Log,
            params(),
            DistanceMetric::Euclidean,
            Neighbourhood::Global,
        )?;
        let at = model.predict(1.0, 0.0)?;
        assert!((at.value - 0.05).abs() < 1e-9);
        assert!((at.value - at.prediction.exp()).abs() < 1e-15);
        Ok(())
    }

    #[test]
    fn test_local_neighbourhood_against_global() -> Result<(), SpatialError> {
        let points: Vec<SamplePoint> = (0..16)
            .map(|i| {
                let (x, y) = ((i % 4) as f64, (i / 4) as f64);
                SamplePoint::new(x, y, (x * 0.7).sin() + y * 0.1)
            })
            .collect();
        let build = |neighbourhood| {
            KrigingModel::new(
                &points,
                KrigingVariant::Ordinary,
                ResponseScale::Raw,
                params(),
                DistanceMetric::Euclidean,
                neighbourhood,
            )
        };
        let global = build(Neighbourhood::Global)?;
        let covering = build(Neighbourhood::Nearest(16))?;
        let all_but_one = build(Neighbourhood::Nearest(15))?;
        let local_few = build(Neighbourhood::Nearest(4))?;

        for (x, y) in [(1.5, 1.5), (0.2, 0.3), (2.6, 0.8)] {
            let g = global.predict(x, y)?;
            let c = covering.predict(x, y)?;
            assert!((g.prediction - c.prediction).abs() < 1e-12, "({x}, {y})");
            assert!((g.variance - c.variance).abs() < 1e-12, "({x}, {y})");

            // The station left out is one of the farthest and mostly screened.
            let near = all_but_one.predict(x, y)?;
            assert!((g.prediction - near.prediction).abs() < 0.1, "({x}, {y}): {g:?} vs {near:?}");
        }
        let few = local_few.predict(1.5, 1.5)?;
        assert!((global.predict(1.5, 1.5)?.prediction - few.prediction).abs() < 0.2);
        Ok(())
    }

    #[test]
    fn test_haversine_neighbours_use_projected_longitude() -> Result<(), SpatialError> {
        let params = VariogramParams {
            nugget: 0.0,
            partial_sill: 1.0,
            range: 100.0,
            kappa: 0.5,
        };
        // At 60°N a degree of longitude is about half a degree of latitude, so
        // A and C are nearer the target than B or D.
        let a = SamplePoint::new(1.5, 60.0, 1.0);
        let b = SamplePoint::new(0.0, 61.0, 2.0);
        let c = SamplePoint::new(-1.5, 60.0, 3.0);
        let d = SamplePoint::new(0.0, 58.8, 10.0);
        let local = KrigingModel::new(
            &[a, b, c, d],
            KrigingVariant::Ordinary,
            ResponseScale::Raw,
            params,
            DistanceMetric::Haversine,
            Neighbourhood::Nearest(3),
        )?;
        let expected = KrigingModel::new(
            &[a, b, c],
            KrigingVariant::Ordinary,
            ResponseScale::Raw,
            params,
            DistanceMetric::Haversine,
            Neighbourhood::Global,
        )?;
        let got = local.predict(0.0, 60.0)?;
        let want = expected.predict(0.0, 60.0)?;
        assert!((got.prediction - want.prediction).abs() < 1e-9, "{got:?} vs {want:?}");
        Ok(())
    }

    #[test]
    fn test_duplicate_locations_are_singular() {
        let points = vec![
            SamplePoint::new(0.0, 0.0, 1.0),
            SamplePoint::new(0.0, 0.0, 2.0),
            SamplePoint::new(1.0, 1.0, 3.0),
        ];
        let result = KrigingModel::new(
            &points,
            KrigingVariant::Ordinary,
            ResponseScale::Raw,
            params(),
            DistanceMetric::Euclidean,
            Neighbourhood::Global,
        );
        assert!(matches!(result, Err(SpatialError::SingularSystem)));
    }

    #[test]
    fn test_duplicate_locations_with_nugget_are_solvable() -> Result<(), SpatialError> {
        let points = vec![
            SamplePoint::new(0.0, 0.0, 1.0),
            SamplePoint::new(0.0, 0.0, 2.0),
            SamplePoint::new(1.0, 1.0, 3.0),
        ];
        let params = VariogramParams {
            nugget: 0.2,
            ..params()
        };
        let model = KrigingModel::new(
            &points,
            KrigingVariant::Ordinary,
            ResponseScale::Raw,
            params,
            DistanceMetric::Euclidean,
            Neighbourhood::Global,
        )?;
        let p = model.predict(0.2, 0.1)?;
        assert!(p.prediction > 1.0 && p.prediction < 3.0, "{p:?}");
        assert!(p.variance > 0.0);

        let centre = model.predict(0.0, 0.0)?;
        assert!(centre.prediction > 1.0 && centre.prediction < 3.0, "{centre:?}");
        Ok(())
    }

    #[test]
    fn test_scale_transforms() {
        assert_eq!(ResponseScale::Log.forward(0.0), None);
        assert_eq!(ResponseScale::Raw.forward(0.0), Some(0.0));
        let v = 0.047;
        let back = ResponseScale::Log.inverse(ResponseScale::Log.forward(v).unwrap_or(f64::NAN));
        assert!((back - v).abs() < 1e-15);
    }
}
