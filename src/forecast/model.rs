use crate::forecast::arima::AutoArima;
use crate::forecast::box_cox::BoxCoxModel;
use crate::forecast::error::ForecastError;
use crate::forecast::ets::Ets;
use crate::forecast::seasonal_naive::SeasonalNaive;
use crate::series::monthly_series::MONTHLY_FREQUENCY;
use bon::Builder;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use std::fmt::{Debug, Display};

/// The model families the selector chooses between.
///
/// The variant order is also the complexity order used to break exact MSE
/// ties: `SeasonalNaive` < `Ets` < `Arima`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    SeasonalNaive,
    Ets,
    /// Automatically ordered seasonal ARIMA; with `box_cox` the series is
    /// first Box-Cox transformed using a Guerrero-estimated lambda.
    Arima { box_cox: bool },
}

impl ModelFamily {
    /// Default candidate set: seasonal naive, ETS and Box-Cox ARIMA.
    pub fn default_candidates() -> Vec<ModelFamily> {
        vec![
            ModelFamily::SeasonalNaive,
            ModelFamily::Ets,
            ModelFamily::Arima { box_cox: true },
        ]
    }

    pub fn complexity_rank(&self) -> u8 {
        match self {
            ModelFamily::SeasonalNaive => 0,
            ModelFamily::Ets => 1,
            ModelFamily::Arima { box_cox: false } => 2,
            ModelFamily::Arima { box_cox: true } => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::SeasonalNaive => "SeasonalNaive",
            ModelFamily::Ets => "ETS",
            ModelFamily::Arima { box_cox: false } => "ARIMA",
            ModelFamily::Arima { box_cox: true } => "ARIMA+BoxCox",
        }
    }

    /// Instantiates an unfitted model of this family.
    pub fn model(&self, options: &ModelOptions) -> Box<dyn ForecastModel> {
        match self {
            ModelFamily::SeasonalNaive => Box::new(SeasonalNaive::new(options)),
            ModelFamily::Ets => Box::new(Ets::new(options)),
            ModelFamily::Arima { box_cox: false } => Box::new(AutoArima::new(options)),
            ModelFamily::Arima { box_cox: true } => Box::new(BoxCoxModel::new(
                AutoArima::new(options),
                *self,
                options.period,
            )),
        }
    }
}

impl Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Estimation settings shared by every model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct ModelOptions {
    /// Seasonal period `m`.
    #[builder(default = MONTHLY_FREQUENCY)]
    pub period: usize,
    /// Coverage of the prediction intervals, in (0, 1).
    #[builder(default = 0.95)]
    pub interval_level: f64,
    /// Nelder-Mead iteration cap per fit.
    #[builder(default = 2000)]
    pub max_optimizer_iterations: usize,
    #[builder(default = 2)]
    pub max_p: usize,
    #[builder(default = 2)]
    pub max_q: usize,
    #[builder(default = 1)]
    pub max_seasonal_p: usize,
    #[builder(default = 1)]
    pub max_seasonal_q: usize,
    #[builder(default = 2)]
    pub max_d: usize,
    #[builder(default = 1)]
    pub max_seasonal_d: usize,
    /// Stepwise ARIMA order search instead of the full grid.
    #[builder(default = true)]
    pub stepwise: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        ModelOptions::builder().build()
    }
}

/// Point forecasts and symmetric (on the model scale) prediction intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub level: f64,
}

impl Forecast {
    /// Builds normal-theory intervals from per-step forecast variances.
    pub fn from_variances(mean: Vec<f64>, variances: &[f64], level: f64) -> Self {
        let z = normal_quantile(0.5 + level / 2.0);
        let (lower, upper) = mean
            .iter()
            .zip(variances)
            .map(|(m, v)| {
                let half = z * v.max(0.0).sqrt();
                (m - half, m + half)
            })
            .unzip();
        Forecast {
            mean,
            lower,
            upper,
            level,
        }
    }

    pub fn horizon(&self) -> usize {
        self.mean.len()
    }

    /// Point forecast at the final step of the horizon.
    pub fn last(&self) -> Option<f64> {
        self.mean.last().copied()
    }

    /// Applies `f` to the mean and both interval bounds.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Forecast {
            mean: self.mean.into_iter().map(&f).collect(),
            lower: self.lower.into_iter().map(&f).collect(),
            upper: self.upper.into_iter().map(&f).collect(),
            level: self.level,
        }
    }
}

fn normal_quantile(p: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(standard) => standard.inverse_cdf(p),
        Err(_) => f64::NAN,
    }
}

/// An unfitted model: a recipe that can be fitted to a series.
pub trait ForecastModel: Send + Sync {
    fn family(&self) -> ModelFamily;

    fn fit(&self, values: &[f64]) -> Result<Box<dyn FittedModel>, ForecastError>;
}

/// A model fitted to one series.
pub trait FittedModel: Send + Sync + Debug {
    fn forecast(&self, horizon: usize) -> Result<Forecast, ForecastError>;

    /// In-sample one-step residuals, aligned with the input series. Entries the
    /// model cannot define (e.g. the first season for seasonal naive) are NaN.
    fn residuals(&self) -> &[f64];

    /// Number of estimated parameters, used as the Ljung-Box `fitdf`.
    fn parameter_count(&self) -> usize;

    /// Human-readable structure, e.g. `ETS(A,Ad,A)`.
    fn describe(&self) -> String;
}

/// Rejects series shorter than `required` and non-finite input. Constant
/// series pass; models that cannot fit them reject them themselves.
pub(crate) fn check_series(
    model: &'static str,
    values: &[f64],
    required: usize,
) -> Result<(), ForecastError> {
    if values.len() < required {
        return Err(ForecastError::InsufficientData {
            model,
            required,
            actual: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::NonFiniteValues);
    }
    Ok(())
}
