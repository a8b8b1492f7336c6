//! Seasonal ARIMA with automatic order selection.
//!
//! Differencing orders come from unit-root style tests (seasonal strength for
//! `D`, repeated KPSS for `d`); the ARMA orders are then chosen by AICc over a
//! stepwise (or exhaustive) search, each candidate being fitted by conditional
//! sum of squares.

use crate::forecast::diagnostics::{ndiffs, seasonal_strength, SEASONAL_STRENGTH_THRESHOLD};
use crate::forecast::error::ForecastError;
use crate::forecast::model::{
    check_series, FittedModel, Forecast, ForecastModel, ModelFamily, ModelOptions,
};
use crate::optim::nelder_mead::NelderMead;
use crate::utils::{difference, is_constant, mean, sample_variance};
use log::debug;
use nalgebra::{DMatrix, Schur};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;

const NAME: &str = "ARIMA";
const MIN_OBSERVATIONS: usize = 8;
const MIN_DIFFERENCED: usize = 4;
const MAX_STEPWISE_MODELS: usize = 94;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl ArimaOrder {
    fn arma(&self) -> (usize, usize, usize, usize) {
        (self.p, self.q, self.seasonal_p, self.seasonal_q)
    }

    fn with_arma(self, (p, q, seasonal_p, seasonal_q): (usize, usize, usize, usize)) -> Self {
        ArimaOrder {
            p,
            q,
            seasonal_p,
            seasonal_q,
            ..self
        }
    }
}

impl Display for ArimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ARIMA({},{},{})", self.p, self.d, self.q)?;
        if self.seasonal_p + self.seasonal_d + self.seasonal_q > 0 {
            write!(
                f,
                "({},{},{})[{}]",
                self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AutoArima {
    options: ModelOptions,
    optimizer: NelderMead,
}

impl AutoArima {
    pub fn new(options: &ModelOptions) -> Self {
        Self {
            options: options.clone(),
            optimizer: NelderMead::new(options.max_optimizer_iterations).with_initial_step(0.2),
        }
    }

    /// Fits one fixed order to the differenced series `w`.
    pub fn fit_order(&self, x: &[f64], order: ArimaOrder) -> Result<ArimaFit, ForecastError> {
        check_series(NAME, x, MIN_OBSERVATIONS)?;
        let w = apply_differencing(x, order.d, order.seasonal_d, order.period);
        // A level when d + D = 0, a drift when d + D = 1, nothing above.
        let include_mean = order.d + order.seasonal_d <= 1;
        let scaled = Standardised::new(&w, include_mean);
        let css = self
            .fit_css(&scaled, order, include_mean)
            .ok_or(ForecastError::FitFailed { model: NAME })?;
        Ok(ArimaFit::new(
            x,
            w,
            css,
            &scaled,
            self.options.interval_level,
        ))
    }

    fn fit_css(&self, series: &Standardised, order: ArimaOrder, include_mean: bool) -> Option<CssFit> {
        let w = &series.values;
        let m = order.period;
        let start = order.p + order.seasonal_p * m;
        if w.len() <= start {
            return None;
        }
        let n_eff = w.len() - start;
        let n_coef =
            order.p + order.q + order.seasonal_p + order.seasonal_q + usize::from(include_mean);
        let k = n_coef + 1;
        if n_eff <= k + 1 {
            return None;
        }

        let objective = |theta: &[f64]| {
            let coefficients = Coefficients::split(theta, order, include_mean);
            if !coefficients.is_admissible() {
                return f64::INFINITY;
            }
            let (ar, ma) = coefficients.expand(m);
            let (sse, _) = css_residuals(w, &ar, &ma, coefficients.mean);
            (n_eff as f64) * (sse / n_eff as f64).max(f64::MIN_POSITIVE).ln()
        };
        let minimum = self.optimizer.minimize(objective, &vec![0.0; n_coef]);
        if !minimum.value.is_finite() {
            return None;
        }

        let coefficients = Coefficients::split(&minimum.point, order, include_mean);
        let (ar, ma) = coefficients.expand(m);
        let (sse_scaled, innovations) = css_residuals(w, &ar, &ma, coefficients.mean);
        let sse = sse_scaled * series.scale * series.scale;

        let nf = n_eff as f64;
        let kf = k as f64;
        let log_likelihood = -0.5
            * nf
            * ((2.0 * std::f64::consts::PI).ln() + 1.0 + (sse / nf).max(f64::MIN_POSITIVE).ln());
        let aicc = -2.0 * log_likelihood + 2.0 * kf + 2.0 * kf * (kf + 1.0) / (nf - kf - 1.0);
        debug!("{order}: css {sse:.6e}, AICc {aicc:.3}");

        Some(CssFit {
            order,
            coefficients,
            ar,
            ma,
            innovations,
            start,
            sse,
            n_coef,
            aicc,
        })
    }

    fn search(&self, series: &Standardised, base: ArimaOrder, include_mean: bool, seasonal_allowed: bool) -> Option<CssFit> {
        let max_p = self.options.max_p;
        let max_q = self.options.max_q;
        let (max_sp, max_sq) = if seasonal_allowed {
            (self.options.max_seasonal_p, self.options.max_seasonal_q)
        } else {
            (0, 0)
        };
        let within = |(p, q, sp, sq): (usize, usize, usize, usize)| {
            p <= max_p && q <= max_q && sp <= max_sp && sq <= max_sq
        };

        let mut cache: HashMap<(usize, usize, usize, usize), Option<CssFit>> = HashMap::new();
        let mut evaluate = |arma: (usize, usize, usize, usize)| -> f64 {
            cache
                .entry(arma)
                .or_insert_with(|| self.fit_css(series, base.with_arma(arma), include_mean))
                .as_ref()
                .map_or(f64::INFINITY, |fit| fit.aicc)
        };

        let mut best = (f64::INFINITY, (0, 0, 0, 0));
        if !self.options.stepwise {
            for p in 0..=max_p {
                for q in 0..=max_q {
                    for sp in 0..=max_sp {
                        for sq in 0..=max_sq {
                            let aicc = evaluate((p, q, sp, sq));
                            if aicc < best.0 {
                                best = (aicc, (p, q, sp, sq));
                            }
                        }
                    }
                }
            }
        } else {
            let starts = [(2, 2, 1, 1), (0, 0, 0, 0), (1, 0, 1, 0), (0, 1, 0, 1)];
            for (p, q, sp, sq) in starts {
                let arma = (p.min(max_p), q.min(max_q), sp.min(max_sp), sq.min(max_sq));
                let aicc = evaluate(arma);
                if aicc < best.0 {
                    best = (aicc, arma);
                }
            }
            let mut tried = 4;
            'improve: loop {
                let (p, q, sp, sq) = best.1;
                let neighbours = [
                    (p.wrapping_sub(1), q, sp, sq),
                    (p + 1, q, sp, sq),
                    (p, q.wrapping_sub(1), sp, sq),
                    (p, q + 1, sp, sq),
                    (p.wrapping_sub(1), q.wrapping_sub(1), sp, sq),
                    (p + 1, q + 1, sp, sq),
                    (p, q, sp.wrapping_sub(1), sq),
                    (p, q, sp + 1, sq),
                    (p, q, sp, sq.wrapping_sub(1)),
                    (p, q, sp, sq + 1),
                ];
                for arma in neighbours.into_iter().filter(|a| within(*a)) {
                    if tried >= MAX_STEPWISE_MODELS {
                        break 'improve;
                    }
                    tried += 1;
                    let aicc = evaluate(arma);
                    if aicc < best.0 {
                        best = (aicc, arma);
                        continue 'improve;
                    }
                }
                break;
            }
        }
        if !best.0.is_finite() {
            return None;
        }
        cache.remove(&best.1).flatten()
    }
}

impl ForecastModel for AutoArima {
    fn family(&self) -> ModelFamily {
        ModelFamily::Arima { box_cox: false }
    }

    fn fit(&self, values: &[f64]) -> Result<Box<dyn FittedModel>, ForecastError> {
        check_series(NAME, values, MIN_OBSERVATIONS)?;
        if is_constant(values, 1e-12) {
            return Err(ForecastError::ConstantSeries { model: NAME });
        }
        let m = self.options.period.max(1);
        let n = values.len();

        let seasonal_d = usize::from(
            m > 1
                && self.options.max_seasonal_d > 0
                && n >= 2 * m
                && seasonal_strength(values, m) > SEASONAL_STRENGTH_THRESHOLD,
        );
        let seasonally_differenced = apply_differencing(values, 0, seasonal_d, m);
        let d = ndiffs(&seasonally_differenced, self.options.max_d);
        let w = apply_differencing(values, d, seasonal_d, m);
        if w.len() < MIN_DIFFERENCED {
            return Err(ForecastError::InsufficientData {
                model: NAME,
                required: n - w.len() + MIN_DIFFERENCED,
                actual: n,
            });
        }

        let base = ArimaOrder {
            p: 0,
            d,
            q: 0,
            seasonal_p: 0,
            seasonal_d,
            seasonal_q: 0,
            period: m,
        };
        let include_mean = d + seasonal_d <= 1;
        let seasonal_allowed = m > 1 && w.len() > 2 * m;
        let scaled = Standardised::new(&w, include_mean);
        let css = self
            .search(&scaled, base, include_mean, seasonal_allowed)
            .ok_or(ForecastError::FitFailed { model: NAME })?;
        debug!("Selected {}", css.order);

        Ok(Box::new(ArimaFit::new(
            values,
            w,
            css,
            &scaled,
            self.options.interval_level,
        )))
    }
}

/// The differenced series shifted by `center` and divided by `scale`, so that
/// the optimiser works on unit-scale data.
struct Standardised {
    values: Vec<f64>,
    center: f64,
    scale: f64,
}

impl Standardised {
    fn new(w: &[f64], include_mean: bool) -> Self {
        let center = if include_mean { mean(w) } else { 0.0 };
        let sd = sample_variance(w).sqrt();
        let scale = if sd.is_finite() && sd > 0.0 { sd } else { 1.0 };
        Standardised {
            values: w.iter().map(|v| (v - center) / scale).collect(),
            center,
            scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Coefficients {
    ar: Vec<f64>,
    ma: Vec<f64>,
    seasonal_ar: Vec<f64>,
    seasonal_ma: Vec<f64>,
    mean: f64,
}

impl Coefficients {
    fn split(theta: &[f64], order: ArimaOrder, include_mean: bool) -> Self {
        let mut offset = 0;
        let mut take = |k: usize| {
            let end = (offset + k).min(theta.len());
            let head = theta[offset..end].to_vec();
            offset = end;
            head
        };
        let ar = take(order.p);
        let ma = take(order.q);
        let seasonal_ar = take(order.seasonal_p);
        let seasonal_ma = take(order.seasonal_q);
        let mean = if include_mean {
            take(1).first().copied().unwrap_or(0.0)
        } else {
            0.0
        };
        Coefficients {
            ar,
            ma,
            seasonal_ar,
            seasonal_ma,
            mean,
        }
    }

    /// Stationary AR parts and invertible MA parts.
    fn is_admissible(&self) -> bool {
        let negated = |c: &[f64]| c.iter().map(|v| -v).collect::<Vec<f64>>();
        roots_outside_unit_circle(&self.ar)
            && roots_outside_unit_circle(&self.seasonal_ar)
            && roots_outside_unit_circle(&negated(&self.ma))
            && roots_outside_unit_circle(&negated(&self.seasonal_ma))
    }

    /// Multiplies out the seasonal and non-seasonal polynomials into full-lag
    /// AR and MA coefficient vectors.
    fn expand(&self, period: usize) -> (Vec<f64>, Vec<f64>) {
        let ar_poly = poly_mul(
            &lag_poly(&self.ar, 1, -1.0),
            &lag_poly(&self.seasonal_ar, period, -1.0),
        );
        let ma_poly = poly_mul(
            &lag_poly(&self.ma, 1, 1.0),
            &lag_poly(&self.seasonal_ma, period, 1.0),
        );
        let ar = trim(ar_poly[1..].iter().map(|c| -c).collect());
        let ma = trim(ma_poly[1..].to_vec());
        (ar, ma)
    }
}

/// `1 + sign * sum_k c_k B^(k * step)` as a dense coefficient vector.
fn lag_poly(coefficients: &[f64], step: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coefficients.len() * step + 1];
    poly[0] = 1.0;
    for (k, c) in coefficients.iter().enumerate() {
        poly[(k + 1) * step] = sign * c;
    }
    poly
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn trim(mut coefficients: Vec<f64>) -> Vec<f64> {
    while coefficients.last() == Some(&0.0) {
        coefficients.pop();
    }
    coefficients
}

/// True when every root of `1 - sum_i c_i z^i` lies outside the unit circle,
/// checked through the eigenvalues of the companion matrix.
fn roots_outside_unit_circle(coefficients: &[f64]) -> bool {
    let c = trim(coefficients.to_vec());
    match c.len() {
        0 => true,
        1 => c[0].abs() < 1.0,
        r => {
            let companion = DMatrix::from_fn(r, r, |i, j| {
                if i == 0 {
                    c[j]
                } else if i == j + 1 {
                    1.0
                } else {
                    0.0
                }
            });
            Schur::try_new(companion, 1e-12, 500)
                .map(|schur| {
                    schur
                        .complex_eigenvalues()
                        .iter()
                        .all(|z| z.norm() < 1.0 - 1e-8)
                })
                .unwrap_or(false)
        }
    }
}

/// Conditional-sum-of-squares residuals; the first `ar.len()` entries are zero.
fn css_residuals(w: &[f64], ar: &[f64], ma: &[f64], mean: f64) -> (f64, Vec<f64>) {
    let start = ar.len();
    let mut errors = vec![0.0; w.len()];
    let mut sse = 0.0;
    for t in start..w.len() {
        let mut prediction = mean;
        for (i, a) in ar.iter().enumerate() {
            prediction += a * (w[t - 1 - i] - mean);
        }
        for (j, b) in ma.iter().enumerate() {
            if t > j {
                prediction += b * errors[t - 1 - j];
            }
        }
        let e = w[t] - prediction;
        errors[t] = e;
        sse += e * e;
    }
    (sse, errors)
}

/// `(1 - B)^d (1 - B^m)^D` applied to `x`.
fn apply_differencing(x: &[f64], d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut w = x.to_vec();
    for _ in 0..seasonal_d {
        w = difference(&w, period);
    }
    for _ in 0..d {
        w = difference(&w, 1);
    }
    w
}

/// Coefficients of `(1 - B)^d (1 - B^m)^D`.
fn differencing_poly(d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    for _ in 0..seasonal_d {
        poly = poly_mul(&poly, &lag_poly(&[1.0], period, -1.0));
    }
    poly
}

struct CssFit {
    order: ArimaOrder,
    coefficients: Coefficients,
    ar: Vec<f64>,
    ma: Vec<f64>,
    innovations: Vec<f64>,
    start: usize,
    sse: f64,
    n_coef: usize,
    aicc: f64,
}

#[derive(Debug, Clone)]
pub struct ArimaFit {
    order: ArimaOrder,
    ar: Vec<f64>,
    ma: Vec<f64>,
    /// Mean of the differenced series; zero when no constant is included.
    mean: f64,
    x: Vec<f64>,
    w: Vec<f64>,
    innovations: Vec<f64>,
    residuals: Vec<f64>,
    sigma2: f64,
    n_coef: usize,
    aicc: f64,
    interval_level: f64,
}

impl ArimaFit {
    fn new(x: &[f64], w: Vec<f64>, css: CssFit, scaled: &Standardised, interval_level: f64) -> Self {
        let scale = scaled.scale;
        let innovations: Vec<f64> = css.innovations.iter().map(|e| e * scale).collect();
        let offset = x.len() - w.len();
        let residuals = (0..x.len())
            .map(|t| {
                if t < offset + css.start {
                    f64::NAN
                } else {
                    innovations[t - offset]
                }
            })
            .collect();
        let n_eff = w.len() - css.start;
        ArimaFit {
            order: css.order,
            ar: css.ar,
            ma: css.ma,
            mean: scaled.center + scale * css.coefficients.mean,
            x: x.to_vec(),
            w,
            innovations,
            residuals,
            sigma2: css.sse / n_eff.saturating_sub(css.n_coef).max(1) as f64,
            n_coef: css.n_coef,
            aicc: css.aicc,
            interval_level,
        }
    }

    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    pub fn aicc(&self) -> f64 {
        self.aicc
    }

    /// Psi weights `psi_0 ..= psi_{h-1}` of the full (integrated) model.
    fn psi_weights(&self, horizon: usize) -> Vec<f64> {
        let diff = differencing_poly(self.order.d, self.order.seasonal_d, self.order.period);
        let ar_poly: Vec<f64> = std::iter::once(1.0)
            .chain(self.ar.iter().map(|a| -a))
            .collect();
        let full: Vec<f64> = poly_mul(&ar_poly, &diff)[1..].iter().map(|c| -c).collect();

        let mut psi = vec![1.0];
        for j in 1..horizon {
            let mut value = self.ma.get(j - 1).copied().unwrap_or(0.0);
            for (i, a) in full.iter().enumerate().take(j) {
                value += a * psi[j - 1 - i];
            }
            psi.push(value);
        }
        psi
    }
}

impl FittedModel for ArimaFit {
    fn forecast(&self, horizon: usize) -> Result<Forecast, ForecastError> {
        if horizon == 0 {
            return Err(ForecastError::ZeroHorizon);
        }
        let mut w = self.w.clone();
        let mut errors = self.innovations.clone();
        for _ in 0..horizon {
            let t = w.len();
            let mut prediction = self.mean;
            for (i, a) in self.ar.iter().enumerate() {
                if let Some(past) = t.checked_sub(i + 1).map(|k| w[k]) {
                    prediction += a * (past - self.mean);
                }
            }
            for (j, b) in self.ma.iter().enumerate() {
                if let Some(past) = t.checked_sub(j + 1).map(|k| errors[k]) {
                    prediction += b * past;
                }
            }
            w.push(prediction);
            errors.push(0.0);
        }

        let diff = differencing_poly(self.order.d, self.order.seasonal_d, self.order.period);
        let mut x = self.x.clone();
        for step in 0..horizon {
            let t = x.len();
            let mut value = w[self.w.len() + step];
            for (i, c) in diff.iter().enumerate().skip(1) {
                value -= c * x[t - i];
            }
            x.push(value);
        }
        let mean = x[self.x.len()..].to_vec();

        let psi = self.psi_weights(horizon);
        let mut cumulative = 0.0;
        let variances: Vec<f64> = psi
            .iter()
            .map(|p| {
                cumulative += p * p;
                self.sigma2 * cumulative
            })
            .collect();
        Ok(Forecast::from_variances(mean, &variances, self.interval_level))
    }

    fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    fn parameter_count(&self) -> usize {
        self.n_coef
    }

    fn describe(&self) -> String {
        self.order.to_string()
    }
}
