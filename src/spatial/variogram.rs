//! Empirical semivariogram and weighted least-squares Matérn fit.
//!
//! ```text
//! γ̂(h_j) = Σ (z_i - z_k)² / (2 N_j)     over pairs with distance in bin j
//! γ(h)   = nugget + psill · (1 - ρ(h))   for h > 0,  γ(0) = 0
//! ```

use crate::config::VariogramConfig;
use crate::optim::nelder_mead::NelderMead;
use crate::spatial::distance::DistanceMetric;
use crate::spatial::error::SpatialError;
use crate::spatial::grid::BoundingBox;
use crate::spatial::kriging::KrigingVariant;
use crate::spatial::matern::matern_correlation;
use crate::spatial::SamplePoint;
use crate::utils::sample_variance;
use bon::bon;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariogramBin {
    /// Mean separation of the pairs in the bin.
    pub lag: f64,
    pub semivariance: f64,
    pub pair_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmpiricalVariogram {
    /// Non-empty bins in increasing lag order.
    pub bins: Vec<VariogramBin>,
    pub cutoff: f64,
}

/// Classical (Matheron) estimator over `n_lags` equal-width bins up to
/// `cutoff`. Empty bins are dropped.
pub fn empirical_variogram(
    points: &[SamplePoint],
    metric: DistanceMetric,
    cutoff: f64,
    n_lags: usize,
) -> EmpiricalVariogram {
    let n_lags = n_lags.max(1);
    let width = cutoff / n_lags as f64;
    let mut sums = vec![(0.0_f64, 0.0_f64, 0usize); n_lags];

    if width > 0.0 {
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                let d = metric.distance(a.position(), b.position());
                if d > cutoff {
                    continue;
                }
                let bin = ((d / width) as usize).min(n_lags - 1);
                let entry = &mut sums[bin];
                entry.0 += d;
                entry.1 += (a.value - b.value).powi(2);
                entry.2 += 1;
            }
        }
    }

    let bins = sums
        .into_iter()
        .filter(|(_, _, count)| *count > 0)
        .map(|(distance_sum, squares, count)| VariogramBin {
            lag: distance_sum / count as f64,
            semivariance: squares / (2.0 * count as f64),
            pair_count: count,
        })
        .collect();
    EmpiricalVariogram { bins, cutoff }
}

/// Residuals of an OLS fit of `value` on `(1, x, y)`.
pub fn detrend_linear(points: &[SamplePoint]) -> Result<Vec<SamplePoint>, SpatialError> {
    if points.len() < 4 {
        return Err(SpatialError::TooFewStations {
            required: 4,
            actual: points.len(),
        });
    }
    let design = DMatrix::from_fn(points.len(), 3, |i, j| match j {
        0 => 1.0,
        1 => points[i].x,
        _ => points[i].y,
    });
    let response = DVector::from_iterator(points.len(), points.iter().map(|p| p.value));
    let coefficients = design
        .clone()
        .svd(true, true)
        .solve(&response, 1e-12)
        .map_err(|e| SpatialError::TrendFit(e.to_string()))?;
    let fitted = &design * &coefficients;
    Ok(points
        .iter()
        .zip(fitted.iter())
        .map(|(p, f)| SamplePoint::new(p.x, p.y, p.value - f))
        .collect())
}

/// Matérn variogram parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariogramParams {
    pub nugget: f64,
    pub partial_sill: f64,
    pub range: f64,
    pub kappa: f64,
}

impl VariogramParams {
    pub fn sill(&self) -> f64 {
        self.nugget + self.partial_sill
    }

    pub fn semivariance(&self, h: f64) -> f64 {
        if h <= 0.0 {
            return 0.0;
        }
        self.nugget + self.partial_sill * (1.0 - matern_correlation(h, self.range, self.kappa))
    }

    /// Covariance `C(h) = sill - γ(h)`; `C(0)` includes the nugget.
    pub fn covariance(&self, h: f64) -> f64 {
        if h <= 0.0 {
            return self.sill();
        }
        self.partial_sill * matern_correlation(h, self.range, self.kappa)
    }

    /// Covariance between two distinct stations. The nugget is measurement
    /// error, so co-located stations share only the partial sill.
    pub fn station_covariance(&self, h: f64) -> f64 {
        if h <= 0.0 {
            return self.partial_sill;
        }
        self.covariance(h)
    }
}

/// Recoverable problems of a variogram fit. The fit still yields parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum VariogramFitWarning {
    #[error("only {bins} usable lag bins; heuristic parameters used")]
    TooFewBins { bins: usize },

    #[error("optimiser hit its iteration cap for kappa {kappa}")]
    NotConverged { kappa: f64 },

    #[error("objective was not finite for any kappa; heuristic parameters used")]
    NonFiniteObjective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedVariogram {
    pub params: VariogramParams,
    /// Weighted SSE of the chosen fit; NaN when heuristic parameters are used.
    pub weighted_sse: f64,
    /// Empirical semivariance is non-decreasing up to the fitted range.
    pub monotonic: bool,
    pub warnings: Vec<VariogramFitWarning>,
    pub empirical: EmpiricalVariogram,
}

#[derive(Debug, Clone)]
pub struct VariogramEstimator {
    n_lags: usize,
    cutoff_fraction: f64,
    cutoff: Option<f64>,
    kappas: Vec<f64>,
    metric: DistanceMetric,
    optimizer: NelderMead,
}

#[bon]
impl VariogramEstimator {
    #[builder]
    pub fn new(
        #[builder(default = 15)] n_lags: usize,
        #[builder(default = 1.0 / 3.0)] cutoff_fraction: f64,
        cutoff: Option<f64>,
        #[builder(default = vec![0.5, 1.0, 1.5, 2.5, 5.0])] kappas: Vec<f64>,
        #[builder(default)] metric: DistanceMetric,
        #[builder(default = 2000)] max_iterations: usize,
    ) -> Self {
        Self {
            n_lags,
            cutoff_fraction,
            cutoff,
            kappas,
            metric,
            optimizer: NelderMead::new(max_iterations).with_initial_step(0.5),
        }
    }

    pub fn from_config(config: &VariogramConfig) -> Self {
        VariogramEstimator::builder()
            .n_lags(config.n_lags)
            .cutoff_fraction(config.cutoff_fraction)
            .maybe_cutoff(config.cutoff)
            .kappas(config.kappas.clone())
            .metric(config.distance)
            .max_iterations(config.max_optimizer_iterations)
            .build()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Empirical variogram of `points` (detrended first for the universal
    /// variant) followed by the Matérn fit.
    pub fn estimate(
        &self,
        points: &[SamplePoint],
        variant: KrigingVariant,
    ) -> Result<FittedVariogram, SpatialError> {
        if points.len() < 3 {
            return Err(SpatialError::TooFewStations {
                required: 3,
                actual: points.len(),
            });
        }
        let residuals = match variant {
            KrigingVariant::Ordinary => points.to_vec(),
            KrigingVariant::Universal => detrend_linear(points)?,
        };
        let bbox = BoundingBox::of_points(points).ok_or(SpatialError::InvalidGridBounds)?;
        let diagonal = bbox.diagonal(self.metric);
        let cutoff = self.cutoff.unwrap_or(diagonal * self.cutoff_fraction);
        let empirical = empirical_variogram(&residuals, self.metric, cutoff, self.n_lags);
        let values: Vec<f64> = residuals.iter().map(|p| p.value).collect();
        Ok(self.fit(empirical, sample_variance(&values), diagonal))
    }

    /// Weighted least-squares fit (weights `N_j / h_j²`) of nugget, partial
    /// sill and range for each candidate kappa; the lowest weighted SSE wins.
    pub fn fit(&self, empirical: EmpiricalVariogram, variance: f64, diagonal: f64) -> FittedVariogram {
        let heuristic = heuristic_params(&empirical, variance, diagonal, self.kappas.first().copied().unwrap_or(0.5));
        let usable: Vec<VariogramBin> = empirical
            .bins
            .iter()
            .copied()
            .filter(|b| b.lag > 0.0 && b.semivariance.is_finite())
            .collect();

        if usable.len() < 2 {
            let warning = VariogramFitWarning::TooFewBins { bins: usable.len() };
            warn!("Variogram fit: {warning}");
            return FittedVariogram {
                monotonic: is_monotonic(&empirical, heuristic.range),
                params: heuristic,
                weighted_sse: f64::NAN,
                warnings: vec![warning],
                empirical,
            };
        }

        let objective = |params: &VariogramParams| {
            usable
                .iter()
                .map(|b| {
                    let weight = b.pair_count as f64 / (b.lag * b.lag);
                    weight * (b.semivariance - params.semivariance(b.lag)).powi(2)
                })
                .sum::<f64>()
        };

        let mut warnings = Vec::new();
        let start = [
            heuristic.nugget.max(1e-12).ln(),
            heuristic.partial_sill.max(1e-12).ln(),
            heuristic.range.max(1e-12).ln(),
        ];
        let best = self
            .kappas
            .iter()
            .filter_map(|&kappa| {
                let decode = |theta: &[f64]| VariogramParams {
                    nugget: theta[0].exp(),
                    partial_sill: theta[1].exp(),
                    range: theta[2].exp(),
                    kappa,
                };
                let minimum = self.optimizer.minimize(|theta| objective(&decode(theta)), &start);
                if !minimum.converged {
                    warnings.push(VariogramFitWarning::NotConverged { kappa });
                }
                debug!("Matérn kappa {kappa}: weighted SSE {:.6e}", minimum.value);
                minimum
                    .value
                    .is_finite()
                    .then(|| (decode(&minimum.point), minimum.value))
            })
            .min_by_key(|(_, sse)| OrderedFloat(*sse));

        let (params, weighted_sse) = match best {
            Some(found) => found,
            None => {
                warnings.push(VariogramFitWarning::NonFiniteObjective);
                (heuristic, f64::NAN)
            }
        };
        for warning in &warnings {
            warn!("Variogram fit: {warning}");
        }
        FittedVariogram {
            monotonic: is_monotonic(&empirical, params.range),
            params,
            weighted_sse,
            warnings,
            empirical,
        }
    }
}

/// Starting values: nugget = smallest semivariance, partial sill = variance
/// minus nugget (floored), range = 10% of the extent diagonal.
fn heuristic_params(
    empirical: &EmpiricalVariogram,
    variance: f64,
    diagonal: f64,
    kappa: f64,
) -> VariogramParams {
    let min_semivariance = empirical
        .bins
        .iter()
        .map(|b| b.semivariance)
        .filter(|s| s.is_finite())
        .min_by_key(|s| OrderedFloat(*s))
        .unwrap_or(0.0);
    let variance = if variance.is_finite() && variance > 0.0 {
        variance
    } else {
        empirical
            .bins
            .iter()
            .map(|b| b.semivariance)
            .fold(0.0, f64::max)
    };
    let nugget = min_semivariance.min(variance).max(0.0);
    VariogramParams {
        nugget,
        partial_sill: (variance - nugget).max(0.1 * variance).max(1e-12),
        range: (0.1 * diagonal).max(1e-12),
        kappa,
    }
}

fn is_monotonic(empirical: &EmpiricalVariogram, range: f64) -> bool {
    empirical
        .bins
        .iter()
        .filter(|b| b.lag <= range)
        .collect::<Vec<_>>()
        .windows(2)
        .all(|w| w[1].semivariance >= w[0].semivariance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trended_points() -> Vec<SamplePoint> {
        (0..25)
            .map(|i| {
                let x = (i % 5) as f64;
                let y = (i / 5) as f64;
                let wiggle = ((i * 37) % 11) as f64 / 11.0 - 0.5;
                SamplePoint::new(x, y, 1.0 + 0.5 * x - 0.25 * y + 0.1 * wiggle)
            })
            .collect()
    }

    #[test]
    fn test_empirical_variogram_on_line() {
        let points: Vec<SamplePoint> = (0..4).map(|i| SamplePoint::new(i as f64, 0.0, i as f64)).collect();
        let ev = empirical_variogram(&points, DistanceMetric::Euclidean, 3.0, 3);
        // bins [0,1), [1,2), [2,3]: distance 1 lands in bin 1, 2 in bin 2, 3 in bin 2
        assert_eq!(ev.bins.len(), 2);
        assert_eq!(ev.bins[0].pair_count, 3);
        assert_eq!(ev.bins[0].lag, 1.0);
        assert_eq!(ev.bins[0].semivariance, 0.5);
        assert_eq!(ev.bins[1].pair_count, 3);
        // pairs at distance 2 (twice) and 3 (once): (4 + 4 + 9) / 6
        assert!((ev.bins[1].semivariance - 17.0 / 6.0).abs() < 1e-12);
        assert!((ev.bins[1].lag - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_detrend_removes_plane() -> Result<(), SpatialError> {
        let plane: Vec<SamplePoint> = (0..12)
            .map(|i| {
                let (x, y) = ((i % 4) as f64, (i / 4) as f64);
                SamplePoint::new(x, y, 2.0 + 3.0 * x - y)
            })
            .collect();
        let residuals = detrend_linear(&plane)?;
        assert!(residuals.iter().all(|p| p.value.abs() < 1e-9));
        Ok(())
    }

    #[test]
    fn test_params_semivariance_and_covariance() {
        let params = VariogramParams {
            nugget: 0.1,
            partial_sill: 1.0,
            range: 2.0,
            kappa: 0.5,
        };
        assert_eq!(params.semivariance(0.0), 0.0);
        assert_eq!(params.covariance(0.0), 1.1);
        let h = 1.5;
        assert!((params.semivariance(h) + params.covariance(h) - params.sill()).abs() < 1e-12);
        assert_eq!(params.station_covariance(0.0), 1.0);
        assert_eq!(params.station_covariance(h), params.covariance(h));
    }

    #[test]
    fn test_fit_recovers_exponential_structure() {
        let truth = VariogramParams {
            nugget: 0.05,
            partial_sill: 1.0,
            range: 3.0,
            kappa: 0.5,
        };
        let bins = (1..=15)
            .map(|j| {
                let lag = j as f64 * 0.8;
                VariogramBin {
                    lag,
                    semivariance: truth.semivariance(lag),
                    pair_count: 40,
                }
            })
            .collect();
        let empirical = EmpiricalVariogram { bins, cutoff: 12.0 };
        let estimator = VariogramEstimator::builder().build();
        let fitted = estimator.fit(empirical, 1.05, 36.0);
        assert_eq!(fitted.params.kappa, 0.5);
        assert!((fitted.params.range - 3.0).abs() < 0.05, "{:?}", fitted.params);
        assert!((fitted.params.partial_sill - 1.0).abs() < 0.02, "{:?}", fitted.params);
        assert!(fitted.monotonic);
        assert!(fitted.weighted_sse < 1e-6);
    }

    #[test]
    fn test_too_few_bins_warns_and_falls_back() {
        let empirical = EmpiricalVariogram {
            bins: vec![VariogramBin {
                lag: 1.0,
                semivariance: 0.2,
                pair_count: 3,
            }],
            cutoff: 2.0,
        };
        let fitted = VariogramEstimator::builder().build().fit(empirical, 0.5, 10.0);
        assert_eq!(fitted.warnings, vec![VariogramFitWarning::TooFewBins { bins: 1 }]);
        assert_eq!(fitted.params.nugget, 0.2);
        assert!((fitted.params.partial_sill - 0.3).abs() < 1e-12);
        assert_eq!(fitted.params.range, 1.0);
    }

    #[test]
    fn test_iteration_cap_reports_unconverged_kappas() {
        let truth = VariogramParams {
            nugget: 0.05,
            partial_sill: 1.0,
            range: 3.0,
            kappa: 0.5,
        };
        let bins = (1..=10)
            .map(|j| {
                let lag = j as f64;
                VariogramBin {
                    lag,
                    semivariance: truth.semivariance(lag),
                    pair_count: 25,
                }
            })
            .collect();
        let empirical = EmpiricalVariogram { bins, cutoff: 10.0 };
        let estimator = VariogramEstimator::builder()
            .kappas(vec![0.5, 2.5])
            .max_iterations(1)
            .build();
        let fitted = estimator.fit(empirical, 1.05, 30.0);
        assert_eq!(
            fitted.warnings,
            vec![
                VariogramFitWarning::NotConverged { kappa: 0.5 },
                VariogramFitWarning::NotConverged { kappa: 2.5 },
            ]
        );
        assert!(fitted.weighted_sse.is_finite());
        assert!(fitted.params.range > 0.0 && fitted.params.partial_sill > 0.0);
    }

    #[test]
    fn test_estimate_universal_detrends() -> Result<(), SpatialError> {
        let points = trended_points();
        let estimator = VariogramEstimator::builder().max_iterations(500).build();
        let ordinary = estimator.estimate(&points, KrigingVariant::Ordinary)?;
        let universal = estimator.estimate(&points, KrigingVariant::Universal)?;
        let max_sv = |v: &FittedVariogram| {
            v.empirical
                .bins
                .iter()
                .map(|b| b.semivariance)
                .fold(0.0, f64::max)
        };
        assert!(max_sv(&universal) < 0.1 * max_sv(&ordinary));
        Ok(())
    }

    #[test]
    fn test_estimate_requires_three_points() {
        let estimator = VariogramEstimator::builder().build();
        let points = vec![SamplePoint::new(0.0, 0.0, 1.0), SamplePoint::new(1.0, 0.0, 2.0)];
        assert_eq!(
            estimator.estimate(&points, KrigingVariant::Ordinary).err(),
            Some(SpatialError::TooFewStations {
                required: 3,
                actual: 2
            })
        );
    }
}
