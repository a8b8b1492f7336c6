//! Small numeric helpers shared by the time-series and spatial stages.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance; NaN for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Lag-`lag` differences `y[t] - y[t - lag]`.
pub fn difference(values: &[f64], lag: usize) -> Vec<f64> {
    if values.len() <= lag {
        return Vec::new();
    }
    (lag..values.len())
        .map(|t| values[t] - values[t - lag])
        .collect()
}

/// True when every value lies within `tolerance` of the first.
pub fn is_constant(values: &[f64], tolerance: f64) -> bool {
    match values.first() {
        Some(first) => values.iter().all(|v| (v - first).abs() <= tolerance),
        None => true,
    }
}

/// Sample autocorrelations `r_1 ..= r_max_lag` (biased estimator, as used by
/// portmanteau tests).
pub fn autocorrelations(values: &[f64], max_lag: usize) -> Vec<f64> {
    let n = values.len();
    let m = mean(values);
    let denom: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (1..=max_lag)
        .map(|k| {
            if k >= n || denom == 0.0 {
                return 0.0;
            }
            let num: f64 = (k..n).map(|t| (values[t] - m) * (values[t - k] - m)).sum();
            num / denom
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&v), 5.0);
        assert!((sample_variance(&v) - 32.0 / 7.0).abs() < 1e-12);
        assert!(mean(&[]).is_nan());
        assert!(sample_variance(&[1.0]).is_nan());
    }

    #[test]
    fn test_difference() {
        assert_eq!(difference(&[1.0, 4.0, 9.0, 16.0], 1), vec![3.0, 5.0, 7.0]);
        assert_eq!(difference(&[1.0, 4.0, 9.0, 16.0], 2), vec![8.0, 12.0]);
        assert!(difference(&[1.0], 1).is_empty());
    }

    #[test]
    fn test_autocorrelation_of_alternating_series() {
        let v: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let r = autocorrelations(&v, 2);
        assert!((r[0] + 0.99).abs() < 1e-9);
        assert!((r[1] - 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_is_constant() {
        assert!(is_constant(&[0.05; 10], 1e-12));
        assert!(!is_constant(&[0.05, 0.06], 1e-12));
    }
}
