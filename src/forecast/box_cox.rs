use crate::forecast::error::ForecastError;
use crate::forecast::model::{FittedModel, Forecast, ForecastModel, ModelFamily};
use crate::optim::golden_section::golden_section_minimize;
use crate::utils::{mean, sample_variance};

pub const LAMBDA_LOWER: f64 = -1.0;
pub const LAMBDA_UPPER: f64 = 2.0;

/// Box-Cox transform; `ln(y)` for `lambda == 0`.
pub fn box_cox(value: f64, lambda: f64) -> f64 {
    if lambda.abs() < 1e-12 {
        value.ln()
    } else {
        (value.powf(lambda) - 1.0) / lambda
    }
}

/// Inverse Box-Cox transform. NaN where `lambda * z + 1 <= 0`.
pub fn inv_box_cox(value: f64, lambda: f64) -> f64 {
    if lambda.abs() < 1e-12 {
        return value.exp();
    }
    let base = lambda * value + 1.0;
    if base <= 0.0 {
        f64::NAN
    } else {
        base.powf(1.0 / lambda)
    }
}

/// Guerrero's method: the lambda in `[-1, 2]` minimising the coefficient of
/// variation of `sd_i / mean_i^(1 - lambda)` across the complete seasons at
/// the end of the series.
///
/// Falls back to `1.0` (no transform) when fewer than two complete seasons are
/// available or every season is flat.
pub fn guerrero_lambda(values: &[f64], period: usize) -> f64 {
    let period = period.max(2);
    let seasons = values.len() / period;
    if seasons < 2 {
        return 1.0;
    }
    let tail = &values[values.len() - seasons * period..];
    let stats: Vec<(f64, f64)> = tail
        .chunks(period)
        .map(|season| (mean(season), sample_variance(season).sqrt()))
        .collect();
    if stats.iter().all(|(_, sd)| *sd == 0.0) {
        return 1.0;
    }

    let cv = |lambda: f64| {
        let ratios: Vec<f64> = stats
            .iter()
            .map(|(m, sd)| sd / m.powf(1.0 - lambda))
            .collect();
        sample_variance(&ratios).sqrt() / mean(&ratios)
    };
    golden_section_minimize(cv, LAMBDA_LOWER, LAMBDA_UPPER, 1e-6, 200)
}

/// Fits the wrapped model on the Box-Cox transformed series and
/// back-transforms its forecasts.
pub struct BoxCoxModel<M> {
    inner: M,
    family: ModelFamily,
    period: usize,
}

impl<M: ForecastModel> BoxCoxModel<M> {
    pub fn new(inner: M, family: ModelFamily, period: usize) -> Self {
        Self {
            inner,
            family,
            period,
        }
    }
}

impl<M: ForecastModel> ForecastModel for BoxCoxModel<M> {
    fn family(&self) -> ModelFamily {
        self.family
    }

    fn fit(&self, values: &[f64]) -> Result<Box<dyn FittedModel>, ForecastError> {
        if values.iter().any(|v| !(*v > 0.0)) {
            return Err(ForecastError::NonPositiveValues);
        }
        let lambda = guerrero_lambda(values, self.period);
        let transformed: Vec<f64> = values.iter().map(|v| box_cox(*v, lambda)).collect();
        let inner = self.inner.fit(&transformed)?;
        Ok(Box::new(BoxCoxFit { inner, lambda }))
    }
}

#[derive(Debug)]
pub struct BoxCoxFit {
    inner: Box<dyn FittedModel>,
    lambda: f64,
}

impl BoxCoxFit {
    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl FittedModel for BoxCoxFit {
    fn forecast(&self, horizon: usize) -> Result<Forecast, ForecastError> {
        let lambda = self.lambda;
        Ok(self
            .inner
            .forecast(horizon)?
            .map(|z| inv_box_cox(z, lambda)))
    }

    /// Residuals on the transformed scale.
    fn residuals(&self) -> &[f64] {
        self.inner.residuals()
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count() + 1
    }

    fn describe(&self) -> String {
        format!("{} with Box-Cox lambda {:.3}", self.inner.describe(), self.lambda)
    }
}
