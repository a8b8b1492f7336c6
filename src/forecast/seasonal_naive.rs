use crate::forecast::error::ForecastError;
use crate::forecast::model::{
    check_series, FittedModel, Forecast, ForecastModel, ModelFamily, ModelOptions,
};

const NAME: &str = "SeasonalNaive";

/// Repeats the last observed season: `ŷ[n+h] = y[n - m + ((h-1) mod m) + 1]`.
#[derive(Debug, Clone)]
pub struct SeasonalNaive {
    period: usize,
    interval_level: f64,
}

impl SeasonalNaive {
    pub fn new(options: &ModelOptions) -> Self {
        Self {
            period: options.period.max(1),
            interval_level: options.interval_level,
        }
    }
}

impl ForecastModel for SeasonalNaive {
    fn family(&self) -> ModelFamily {
        ModelFamily::SeasonalNaive
    }

    fn fit(&self, values: &[f64]) -> Result<Box<dyn FittedModel>, ForecastError> {
        let m = self.period;
        check_series(NAME, values, m + 1)?;

        let residuals: Vec<f64> = (0..values.len())
            .map(|t| if t < m { f64::NAN } else { values[t] - values[t - m] })
            .collect();
        let defined: Vec<f64> = residuals.iter().copied().filter(|r| r.is_finite()).collect();
        let sigma2 = defined.iter().map(|r| r * r).sum::<f64>() / defined.len() as f64;

        Ok(Box::new(SeasonalNaiveFit {
            last_season: values[values.len() - m..].to_vec(),
            residuals,
            sigma2,
            interval_level: self.interval_level,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct SeasonalNaiveFit {
    last_season: Vec<f64>,
    residuals: Vec<f64>,
    sigma2: f64,
    interval_level: f64,
}

impl FittedModel for SeasonalNaiveFit {
    fn forecast(&self, horizon: usize) -> Result<Forecast, ForecastError> {
        if horizon == 0 {
            return Err(ForecastError::ZeroHorizon);
        }
        let m = self.last_season.len();
        let mean = (0..horizon).map(|k| self.last_season[k % m]).collect();
        let variances: Vec<f64> = (0..horizon)
            .map(|k| self.sigma2 * ((k / m) + 1) as f64)
            .collect();
        Ok(Forecast::from_variances(mean, &variances, self.interval_level))
    }

    fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn describe(&self) -> String {
        format!("SNAIVE[{}]", self.last_season.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_series_forecasts_the_constant() -> Result<(), ForecastError> {
        let model = SeasonalNaive::new(&ModelOptions::default());
        let fit = model.fit(&[0.05; 36])?;
        let forecast = fit.forecast(3)?;
        assert_eq!(forecast.mean, vec![0.05; 3]);
        assert_eq!(forecast.lower, forecast.upper);
        Ok(())
    }

    #[test]
    fn test_repeats_last_season() -> Result<(), ForecastError> {
        let options = ModelOptions::builder().period(4).build();
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let fit = SeasonalNaive::new(&options).fit(&values)?;
        assert_eq!(fit.forecast(6)?.mean, vec![5.0, 6.0, 7.0, 8.0, 5.0, 6.0]);

        let residuals = fit.residuals();
        assert!(residuals[..4].iter().all(|r| r.is_nan()));
        assert_eq!(&residuals[4..], &[4.0, 4.0, 4.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_interval_widens_each_season() -> Result<(), ForecastError> {
        let options = ModelOptions::builder().period(2).build();
        let fit = SeasonalNaive::new(&options).fit(&[1.0, 2.0, 2.0, 1.0, 1.5, 2.5])?;
        let forecast = fit.forecast(3)?;
        let width = |i: usize| forecast.upper[i] - forecast.lower[i];
        assert!((width(0) - width(1)).abs() < 1e-12);
        assert!((width(2) / width(0) - 2f64.sqrt()).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_too_short() {
        let result = SeasonalNaive::new(&ModelOptions::default()).fit(&[0.05; 12]);
        assert_eq!(
            result.err(),
            Some(ForecastError::InsufficientData {
                model: "SeasonalNaive",
                required: 13,
                actual: 12
            })
        );
    }
}
