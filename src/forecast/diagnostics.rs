//! Residual and stationarity diagnostics used by model selection and by the
//! ARIMA order search.

use crate::utils::{autocorrelations, is_constant, mean};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// 5% critical value of the KPSS level-stationarity statistic.
pub const KPSS_CRITICAL_5PCT: f64 = 0.463;

/// Seasonal strength above which one seasonal difference is taken.
pub const SEASONAL_STRENGTH_THRESHOLD: f64 = 0.64;

/// Outcome of a Ljung-Box portmanteau test on model residuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LjungBox {
    pub statistic: f64,
    pub lag: usize,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    /// Residuals look like white noise at the configured significance level.
    pub passed: bool,
}

/// Default test lag for a series of length `n` and seasonal period `m`.
pub fn ljung_box_lag(n: usize, period: usize) -> usize {
    (2 * period).min(n / 5).max(1)
}

/// Ljung-Box test on the finite entries of `residuals`.
///
/// `fit_df` is subtracted from the lag to form the chi-squared degrees of
/// freedom, clamped to at least one. Returns `None` when fewer than `lag + 1`
/// finite residuals are available.
pub fn ljung_box(residuals: &[f64], lag: usize, fit_df: usize, significance: f64) -> Option<LjungBox> {
    let finite: Vec<f64> = residuals.iter().copied().filter(|r| r.is_finite()).collect();
    let n = finite.len();
    if lag == 0 || n <= lag {
        return None;
    }
    let acf = autocorrelations(&finite, lag);
    let nf = n as f64;
    let statistic = nf
        * (nf + 2.0)
        * acf
            .iter()
            .enumerate()
            .map(|(i, r)| r * r / (nf - (i + 1) as f64))
            .sum::<f64>();
    let degrees_of_freedom = lag.saturating_sub(fit_df).max(1);
    let p_value = ChiSquared::new(degrees_of_freedom as f64)
        .map(|chi| 1.0 - chi.cdf(statistic))
        .unwrap_or(f64::NAN);
    Some(LjungBox {
        statistic,
        lag,
        degrees_of_freedom,
        p_value,
        passed: p_value >= significance,
    })
}

/// KPSS statistic for level stationarity with a Bartlett long-run variance
/// truncated at `trunc(4 (n/100)^0.25)` lags.
pub fn kpss_statistic(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 {
        return f64::NAN;
    }
    let m = mean(values);
    let e: Vec<f64> = values.iter().map(|v| v - m).collect();
    let nf = n as f64;

    let mut partial = 0.0;
    let mut eta_num = 0.0;
    for r in &e {
        partial += r;
        eta_num += partial * partial;
    }

    let lags = (4.0 * (nf / 100.0).powf(0.25)).trunc() as usize;
    let mut s2 = e.iter().map(|r| r * r).sum::<f64>() / nf;
    for j in 1..=lags.min(n - 1) {
        let weight = 1.0 - j as f64 / (lags as f64 + 1.0);
        let cov: f64 = (j..n).map(|t| e[t] * e[t - j]).sum();
        s2 += 2.0 * weight * cov / nf;
    }
    if s2 <= 0.0 {
        return f64::NAN;
    }
    eta_num / (nf * nf * s2)
}

/// Number of first differences needed for KPSS level stationarity.
pub fn ndiffs(values: &[f64], max_d: usize) -> usize {
    let mut x = values.to_vec();
    let mut d = 0;
    while d < max_d {
        if x.len() < 3 || is_constant(&x, 1e-12) {
            break;
        }
        let stat = kpss_statistic(&x);
        if !(stat > KPSS_CRITICAL_5PCT) {
            break;
        }
        x = crate::utils::difference(&x, 1);
        d += 1;
    }
    d
}

/// Seasonal strength `max(0, 1 - Var(R) / Var(S + R))` from a classical
/// additive decomposition with a centred moving-average trend.
///
/// Returns 0 for series shorter than two full periods.
pub fn seasonal_strength(values: &[f64], period: usize) -> f64 {
    let n = values.len();
    if period < 2 || n < 2 * period {
        return 0.0;
    }
    let trend = centred_moving_average(values, period);

    let mut sums = vec![0.0; period];
    let mut counts = vec![0usize; period];
    for (t, trend_t) in trend.iter().enumerate() {
        if let Some(tr) = trend_t {
            sums[t % period] += values[t] - tr;
            counts[t % period] += 1;
        }
    }
    let mut seasonal: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();
    let offset = mean(&seasonal);
    seasonal.iter_mut().for_each(|s| *s -= offset);

    let mut remainder = Vec::new();
    let mut detrended = Vec::new();
    for (t, trend_t) in trend.iter().enumerate() {
        if let Some(tr) = trend_t {
            let d = values[t] - tr;
            detrended.push(d);
            remainder.push(d - seasonal[t % period]);
        }
    }
    let var_r = population_variance(&remainder);
    let var_sr = population_variance(&detrended);
    if !(var_sr > 0.0) {
        return 0.0;
    }
    (1.0 - var_r / var_sr).max(0.0)
}

fn centred_moving_average(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let half = period / 2;
    (0..n)
        .map(|t| {
            if t < half || t + half >= n {
                return None;
            }
            if period % 2 == 1 {
                let window = &values[t - half..=t + half];
                return Some(window.iter().sum::<f64>() / period as f64);
            }
            // 2 x m moving average for even periods
            let inner: f64 = values[t - half + 1..t + half].iter().sum();
            let ends = 0.5 * (values[t - half] + values[t + half]);
            Some((inner + ends) / period as f64)
        })
        .collect()
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_noise(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
            })
            .collect()
    }

    #[test]
    fn test_ljung_box_white_noise_passes() {
        let noise = pseudo_noise(120, 7);
        let test = ljung_box(&noise, 24, 0, 0.001).expect("enough residuals");
        assert!(test.passed, "{test:?}");
        assert_eq!(test.degrees_of_freedom, 24);
    }

    #[test]
    fn test_ljung_box_autocorrelated_fails() {
        let alternating: Vec<f64> = (0..120).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let test = ljung_box(&alternating, 10, 2, 0.05).expect("enough residuals");
        assert!(!test.passed);
        assert!(test.p_value < 1e-6);
        assert_eq!(test.degrees_of_freedom, 8);
    }

    #[test]
    fn test_ljung_box_ignores_nan_and_clamps_df() {
        let mut residuals = vec![f64::NAN; 12];
        residuals.extend(pseudo_noise(60, 3));
        let test = ljung_box(&residuals, 12, 30, 0.05).expect("enough residuals");
        assert_eq!(test.degrees_of_freedom, 1);
        assert!(ljung_box(&[0.1, 0.2], 12, 0, 0.05).is_none());
    }

    #[test]
    fn test_ljung_box_lag() {
        assert_eq!(ljung_box_lag(240, 12), 24);
        assert_eq!(ljung_box_lag(60, 12), 12);
    }

    #[test]
    fn test_ndiffs() {
        let alternating: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(kpss_statistic(&alternating) < 0.05);
        assert_eq!(ndiffs(&alternating, 2), 0);

        let noise = pseudo_noise(100, 11);
        let trending: Vec<f64> = (0..100).map(|i| i as f64 + noise[i]).collect();
        assert!(ndiffs(&trending, 2) >= 1);
        assert_eq!(ndiffs(&trending, 0), 0);
    }

    #[test]
    fn test_seasonal_strength() {
        let noise = pseudo_noise(72, 5);
        let seasonal: Vec<f64> = (0..72)
            .map(|t| (2.0 * std::f64::consts::PI * t as f64 / 12.0).sin() + 0.05 * noise[t])
            .collect();
        assert!(seasonal_strength(&seasonal, 12) > SEASONAL_STRENGTH_THRESHOLD);
        assert!(seasonal_strength(&noise, 12) < SEASONAL_STRENGTH_THRESHOLD);
        assert_eq!(seasonal_strength(&noise[..20], 12), 0.0);
    }
}
