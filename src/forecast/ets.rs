//! Additive-error exponential smoothing (ETS) with automatic structure choice.
//!
//! Candidate structures are ANN, AAN, AAdN and, when at least two seasons are
//! available, ANA, AAA and AAdA. Smoothing parameters are estimated by
//! Nelder-Mead on the concentrated Gaussian likelihood; initial states are set
//! heuristically from the first observations. The structure with the lowest
//! AICc wins.

use crate::forecast::error::ForecastError;
use crate::forecast::model::{
    check_series, FittedModel, Forecast, ForecastModel, ModelFamily, ModelOptions,
};
use crate::optim::nelder_mead::NelderMead;
use crate::utils::{is_constant, mean};
use log::debug;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

const NAME: &str = "ETS";
const MIN_OBSERVATIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    None,
    Additive,
    Damped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EtsStructure {
    pub trend: Trend,
    pub seasonal: bool,
}

impl EtsStructure {
    pub fn candidates(seasonal_allowed: bool) -> Vec<EtsStructure> {
        let trends = [Trend::None, Trend::Additive, Trend::Damped];
        let seasonal_options: &[bool] = if seasonal_allowed {
            &[false, true]
        } else {
            &[false]
        };
        seasonal_options
            .iter()
            .flat_map(|&seasonal| trends.iter().map(move |&trend| EtsStructure { trend, seasonal }))
            .collect()
    }

    fn smoothing_count(&self) -> usize {
        1 + usize::from(self.trend != Trend::None)
            + usize::from(self.seasonal)
            + usize::from(self.trend == Trend::Damped)
    }

    fn state_count(&self, period: usize) -> usize {
        1 + usize::from(self.trend != Trend::None) + if self.seasonal { period - 1 } else { 0 }
    }
}

impl Display for EtsStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trend = match self.trend {
            Trend::None => "N",
            Trend::Additive => "A",
            Trend::Damped => "Ad",
        };
        let season = if self.seasonal { "A" } else { "N" };
        write!(f, "ETS(A,{trend},{season})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Smoothing {
    alpha: f64,
    beta: f64,
    gamma: f64,
    phi: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct States {
    level: f64,
    trend: f64,
    season: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Ets {
    period: usize,
    interval_level: f64,
    optimizer: NelderMead,
}

impl Ets {
    pub fn new(options: &ModelOptions) -> Self {
        Self {
            period: options.period.max(1),
            interval_level: options.interval_level,
            optimizer: NelderMead::new(options.max_optimizer_iterations).with_initial_step(0.5),
        }
    }

    fn fit_structure(&self, values: &[f64], structure: EtsStructure) -> Option<EtsFit> {
        let n = values.len();
        let m = self.period;
        let k = structure.smoothing_count() + structure.state_count(m) + 1;
        if n <= k + 1 {
            return None;
        }
        let init = initial_states(values, structure, m);

        let objective = |theta: &[f64]| {
            let smoothing = decode(theta, structure);
            let (sse, _, _) = filter(values, structure, smoothing, &init, m);
            if !sse.is_finite() {
                return f64::INFINITY;
            }
            n as f64 * (sse / n as f64).max(f64::MIN_POSITIVE).ln()
        };
        let start = encode(
            Smoothing {
                alpha: 0.3,
                beta: 0.1,
                gamma: 0.1,
                phi: 0.95,
            },
            structure,
        );
        let minimum = self.optimizer.minimize(objective, &start);
        if !minimum.value.is_finite() {
            return None;
        }
        let smoothing = decode(&minimum.point, structure);
        let (sse, residuals, last) = filter(values, structure, smoothing, &init, m);

        let nf = n as f64;
        let log_likelihood =
            -0.5 * nf * ((2.0 * std::f64::consts::PI).ln() + 1.0 + (sse / nf).max(f64::MIN_POSITIVE).ln());
        let kf = k as f64;
        let aicc = -2.0 * log_likelihood + 2.0 * kf + 2.0 * kf * (kf + 1.0) / (nf - kf - 1.0);
        debug!("{structure}: sse {sse:.6e}, AICc {aicc:.3}");

        Some(EtsFit {
            structure,
            smoothing,
            states: last,
            n,
            period: m,
            residuals,
            sigma2: sse / (n - k + 1).max(1) as f64,
            aicc,
            interval_level: self.interval_level,
        })
    }
}

impl ForecastModel for Ets {
    fn family(&self) -> ModelFamily {
        ModelFamily::Ets
    }

    fn fit(&self, values: &[f64]) -> Result<Box<dyn FittedModel>, ForecastError> {
        check_series(NAME, values, MIN_OBSERVATIONS)?;
        if is_constant(values, 1e-12) {
            return Err(ForecastError::ConstantSeries { model: NAME });
        }
        let seasonal_allowed = self.period > 1 && values.len() >= 2 * self.period;
        EtsStructure::candidates(seasonal_allowed)
            .into_iter()
            .filter_map(|structure| self.fit_structure(values, structure))
            .min_by_key(|fit| OrderedFloat(fit.aicc))
            .map(|fit| Box::new(fit) as Box<dyn FittedModel>)
            .ok_or(ForecastError::FitFailed { model: NAME })
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

const PARAM_EPS: f64 = 1e-4;

/// Maps unconstrained parameters onto `0 < beta < alpha < 1`,
/// `0 < gamma < 1 - alpha`, `0.8 < phi < 0.98`.
fn decode(theta: &[f64], structure: EtsStructure) -> Smoothing {
    let mut it = theta.iter().copied();
    let alpha = PARAM_EPS + (1.0 - 2.0 * PARAM_EPS) * logistic(it.next().unwrap_or(0.0));
    let beta = if structure.trend != Trend::None {
        alpha * logistic(it.next().unwrap_or(0.0))
    } else {
        0.0
    };
    let gamma = if structure.seasonal {
        (1.0 - alpha) * logistic(it.next().unwrap_or(0.0))
    } else {
        0.0
    };
    let phi = match structure.trend {
        Trend::Damped => 0.8 + 0.18 * logistic(it.next().unwrap_or(0.0)),
        _ => 1.0,
    };
    Smoothing {
        alpha,
        beta,
        gamma,
        phi,
    }
}

fn encode(smoothing: Smoothing, structure: EtsStructure) -> Vec<f64> {
    let mut theta = vec![logit((smoothing.alpha - PARAM_EPS) / (1.0 - 2.0 * PARAM_EPS))];
    if structure.trend != Trend::None {
        theta.push(logit(smoothing.beta / smoothing.alpha));
    }
    if structure.seasonal {
        theta.push(logit(smoothing.gamma / (1.0 - smoothing.alpha)));
    }
    if structure.trend == Trend::Damped {
        theta.push(logit((smoothing.phi - 0.8) / 0.18));
    }
    theta
}

/// Heuristic states at time zero (before the first observation).
fn initial_states(values: &[f64], structure: EtsStructure, m: usize) -> States {
    if structure.seasonal {
        let first = mean(&values[..m]);
        let second = mean(&values[m..2 * m]);
        let trend = if structure.trend != Trend::None {
            (second - first) / m as f64
        } else {
            0.0
        };
        let mut season: Vec<f64> = (0..m)
            .map(|i| 0.5 * ((values[i] - first) + (values[m + i] - second)))
            .collect();
        let offset = mean(&season);
        season.iter_mut().for_each(|s| *s -= offset);
        States {
            level: first - trend * (m as f64 + 1.0) / 2.0,
            trend,
            season,
        }
    } else if structure.trend != Trend::None {
        let k = values.len().min(10);
        let (intercept, slope) = linear_fit(&values[..k]);
        States {
            level: intercept - slope,
            trend: slope,
            season: Vec::new(),
        }
    } else {
        States {
            level: values[0],
            trend: 0.0,
            season: Vec::new(),
        }
    }
}

/// Least-squares `(intercept, slope)` of `values` against `0..n`.
fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let t_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let (num, den) = values.iter().enumerate().fold((0.0, 0.0), |(num, den), (t, y)| {
        let dt = t as f64 - t_mean;
        (num + dt * (y - y_mean), den + dt * dt)
    });
    let slope = if den > 0.0 { num / den } else { 0.0 };
    (y_mean - slope * t_mean, slope)
}

/// Runs the state-space recursions; returns `(SSE, residuals, final states)`.
fn filter(
    values: &[f64],
    structure: EtsStructure,
    smoothing: Smoothing,
    init: &States,
    m: usize,
) -> (f64, Vec<f64>, States) {
    let Smoothing {
        alpha,
        beta,
        gamma,
        phi,
    } = smoothing;
    let mut level = init.level;
    let mut trend = init.trend;
    let mut season = init.season.clone();
    let mut residuals = Vec::with_capacity(values.len());
    let mut sse = 0.0;

    for (t, y) in values.iter().enumerate() {
        let s = if structure.seasonal { season[t % m] } else { 0.0 };
        let damped_trend = phi * trend;
        let error = y - (level + damped_trend + s);
        sse += error * error;
        residuals.push(error);

        level = level + damped_trend + alpha * error;
        trend = damped_trend + beta * error;
        if structure.seasonal {
            season[t % m] = s + gamma * error;
        }
    }
    (
        sse,
        residuals,
        States {
            level,
            trend,
            season,
        },
    )
}

#[derive(Debug, Clone)]
pub struct EtsFit {
    structure: EtsStructure,
    smoothing: Smoothing,
    states: States,
    n: usize,
    period: usize,
    residuals: Vec<f64>,
    sigma2: f64,
    aicc: f64,
    interval_level: f64,
}

impl EtsFit {
    pub fn structure(&self) -> EtsStructure {
        self.structure
    }

    pub fn aicc(&self) -> f64 {
        self.aicc
    }

    /// `sum_{i=1}^{h} phi^i`
    fn damped_sum(&self, h: usize) -> f64 {
        let phi = self.smoothing.phi;
        (1..=h).map(|i| phi.powi(i as i32)).sum()
    }
}

impl FittedModel for EtsFit {
    fn forecast(&self, horizon: usize) -> Result<Forecast, ForecastError> {
        if horizon == 0 {
            return Err(ForecastError::ZeroHorizon);
        }
        let Smoothing {
            alpha, beta, gamma, ..
        } = self.smoothing;
        let mean: Vec<f64> = (1..=horizon)
            .map(|h| {
                let s = if self.structure.seasonal {
                    self.states.season[(self.n + h - 1) % self.period]
                } else {
                    0.0
                };
                self.states.level + self.damped_sum(h) * self.states.trend + s
            })
            .collect();

        let mut cumulative = 0.0;
        let variances: Vec<f64> = (1..=horizon)
            .map(|h| {
                let variance = self.sigma2 * (1.0 + cumulative);
                // c_h feeds the variance of step h + 1
                let seasonal_term = if self.structure.seasonal && h % self.period == 0 {
                    gamma
                } else {
                    0.0
                };
                let c = alpha + beta * self.damped_sum(h) + seasonal_term;
                cumulative += c * c;
                variance
            })
            .collect();

        Ok(Forecast::from_variances(mean, &variances, self.interval_level))
    }

    fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    fn parameter_count(&self) -> usize {
        self.structure.smoothing_count() + self.structure.state_count(self.period)
    }

    fn describe(&self) -> String {
        self.structure.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seasonal_series(n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| {
                let season = (2.0 * std::f64::consts::PI * t as f64 / 12.0).sin();
                let wiggle = ((t * 7919) % 13) as f64 / 13.0 - 0.5;
                0.05 + 0.01 * season + 0.0005 * wiggle
            })
            .collect()
    }

    #[test]
    fn test_structure_names() {
        let names: Vec<String> = EtsStructure::candidates(true)
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            names,
            vec!["ETS(A,N,N)", "ETS(A,A,N)", "ETS(A,Ad,N)", "ETS(A,N,A)", "ETS(A,A,A)", "ETS(A,Ad,A)"]
        );
        assert_eq!(EtsStructure::candidates(false).len(), 3);
    }

    #[test]
    fn test_parameter_bounds() {
        let structure = EtsStructure {
            trend: Trend::Damped,
            seasonal: true,
        };
        for theta in [[-50.0, -50.0, -50.0, -50.0], [50.0, 50.0, 50.0, 50.0], [0.0; 4]] {
            let s = decode(&theta, structure);
            assert!(s.alpha > 0.0 && s.alpha < 1.0);
            assert!(s.beta >= 0.0 && s.beta <= s.alpha);
            assert!(s.gamma >= 0.0 && s.gamma <= 1.0 - s.alpha);
            assert!(s.phi >= 0.8 && s.phi <= 0.98 + 1e-12);
        }
        let start = Smoothing {
            alpha: 0.3,
            beta: 0.1,
            gamma: 0.1,
            phi: 0.95,
        };
        let decoded = decode(&encode(start, structure), structure);
        assert!((decoded.alpha - 0.3).abs() < 1e-12);
        assert!((decoded.phi - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_seasonal_series_picks_seasonal_structure() -> Result<(), ForecastError> {
        let values = seasonal_series(72);
        let fit = Ets::new(&ModelOptions::default()).fit(&values)?;
        assert!(fit.describe().ends_with(",A)"), "{}", fit.describe());

        let forecast = fit.forecast(12)?;
        let expected = seasonal_series(84);
        for (got, want) in forecast.mean.iter().zip(&expected[72..]) {
            assert!((got - want).abs() < 0.003, "{got} vs {want}");
        }
        assert!(forecast.lower.iter().zip(&forecast.upper).all(|(l, u)| l <= u));
        Ok(())
    }

    #[test]
    fn test_level_series_forecasts_near_level() -> Result<(), ForecastError> {
        let values: Vec<f64> = (0..30).map(|t| 0.05 + if t % 2 == 0 { 0.001 } else { -0.001 }).collect();
        let options = ModelOptions::builder().period(1).build();
        let forecast = Ets::new(&options).fit(&values)?.forecast(1)?;
        assert!((forecast.mean[0] - 0.05).abs() < 0.0015, "{:?}", forecast.mean);
        Ok(())
    }

    #[test]
    fn test_constant_series_rejected() {
        let result = Ets::new(&ModelOptions::default()).fit(&[0.05; 40]);
        assert_eq!(result.err(), Some(ForecastError::ConstantSeries { model: "ETS" }));
    }

    #[test]
    fn test_interval_widens_with_horizon() -> Result<(), ForecastError> {
        let values = seasonal_series(60);
        let forecast = Ets::new(&ModelOptions::default()).fit(&values)?.forecast(6)?;
        let widths: Vec<f64> = forecast
            .upper
            .iter()
            .zip(&forecast.lower)
            .map(|(u, l)| u - l)
            .collect();
        assert!(widths.windows(2).all(|w| w[1] >= w[0] - 1e-15));
        Ok(())
    }
}
