use crate::errors::{AppError, AppResult};
use crate::ingest::MIN_ACTIVITY_SAMPLES;
use crate::models::{ActivitySample, FallbackReason, ForecastPoint, Outcome};
use crate::risk::RiskEvaluator;
use chrono::{Datelike, Duration, NaiveDate};

/// Two-sided 80% normal interval, the width of the reported upper bound.
const INTERVAL_Z: f64 = 1.281_551_565_544_600_4;

/// Longest horizon a single run will forecast.
pub const MAX_HORIZON_DAYS: usize = 366;

/// Linear trend plus day-of-week offsets, fitted by least squares.
#[derive(Debug, Clone, PartialEq)]
struct AdditiveModel {
    origin: NaiveDate,
    last_observed: NaiveDate,
    intercept: f64,
    slope: f64,
    weekly: [f64; 7],
    residual_std: f64,
    observations: usize,
}

impl AdditiveModel {
    fn fit(samples: &[ActivitySample]) -> AppResult<Self> {
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return Err(AppError::ModelFitting("no samples to fit".to_string()));
        };
        let origin = first.date;
        let n = samples.len() as f64;
        let xs: Vec<f64> = samples
            .iter()
            .map(|sample| (sample.date - origin).num_days() as f64)
            .collect();
        let ys: Vec<f64> = samples.iter().map(|sample| f64::from(sample.count)).collect();

        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = ys.iter().sum::<f64>() / n;
        let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
        let sxy: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        let intercept = mean_y - slope * mean_x;

        let mut sums = [0.0_f64; 7];
        let mut counts = [0usize; 7];
        for ((sample, x), y) in samples.iter().zip(&xs).zip(&ys) {
            let weekday = sample.date.weekday().num_days_from_monday() as usize;
            sums[weekday] += y - (intercept + slope * x);
            counts[weekday] += 1;
        }
        let mut weekly = [0.0_f64; 7];
        for day in 0..7 {
            if counts[day] > 0 {
                weekly[day] = sums[day] / counts[day] as f64;
            }
        }
        let centre = weekly.iter().sum::<f64>() / 7.0;
        for effect in weekly.iter_mut() {
            *effect -= centre;
        }

        let mut model = Self {
            origin,
            last_observed: last.date,
            intercept: intercept + centre,
            slope,
            weekly,
            residual_std: 0.0,
            observations: samples.len(),
        };

        let squared_error: f64 = samples
            .iter()
            .zip(&ys)
            .map(|(sample, y)| (y - model.mean_at(sample.date)).powi(2))
            .sum();
        let dof = samples.len().saturating_sub(2).max(1) as f64;
        model.residual_std = (squared_error / dof).sqrt();

        let params_finite = model.intercept.is_finite()
            && model.slope.is_finite()
            && model.residual_std.is_finite()
            && model.weekly.iter().all(|value| value.is_finite());
        if !params_finite {
            return Err(AppError::ModelFitting(
                "non-finite model parameters".to_string(),
            ));
        }
        Ok(model)
    }

    fn mean_at(&self, date: NaiveDate) -> f64 {
        let x = (date - self.origin).num_days() as f64;
        let weekday = date.weekday().num_days_from_monday() as usize;
        self.intercept + self.slope * x + self.weekly[weekday]
    }

    /// Interval widens with distance past the last observation.
    fn upper_at(&self, date: NaiveDate) -> f64 {
        let ahead = (date - self.last_observed).num_days().max(0) as f64;
        let spread = (1.0 + ahead / self.observations as f64).sqrt();
        self.mean_at(date) + INTERVAL_Z * self.residual_std * spread
    }
}

enum ForecasterState {
    Untrained,
    Trained(AdditiveModel),
}

pub struct TimeSeriesForecaster {
    history: Vec<ActivitySample>,
    risk: RiskEvaluator,
    state: ForecasterState,
}

impl TimeSeriesForecaster {
    pub fn new(mut history: Vec<ActivitySample>, risk: RiskEvaluator) -> Self {
        history.sort_by_key(|sample| sample.date);
        Self {
            history,
            risk,
            state: ForecasterState::Untrained,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ForecasterState::Trained(_))
    }

    pub fn train(&mut self) -> AppResult<()> {
        if self.is_trained() {
            return Ok(());
        }
        if self.history.len() < MIN_ACTIVITY_SAMPLES {
            tracing::warn!(
                samples = self.history.len(),
                required = MIN_ACTIVITY_SAMPLES,
                "not enough activity history to train"
            );
            return Err(AppError::InsufficientData(format!(
                "{} activity samples, need {}",
                self.history.len(),
                MIN_ACTIVITY_SAMPLES
            )));
        }

        match AdditiveModel::fit(&self.history) {
            Ok(model) => {
                tracing::info!(
                    samples = model.observations,
                    slope = model.slope,
                    residual_std = model.residual_std,
                    "forecast model trained"
                );
                self.state = ForecasterState::Trained(model);
                Ok(())
            }
            Err(error) => {
                tracing::error!(error = %error, "forecast training failed");
                self.state = ForecasterState::Untrained;
                Err(error)
            }
        }
    }

    /// Forecasts the `horizon_days` days following the last observation.
    pub fn predict(&mut self, horizon_days: usize) -> Outcome<Vec<ForecastPoint>> {
        if horizon_days > MAX_HORIZON_DAYS {
            tracing::warn!(horizon_days, limit = MAX_HORIZON_DAYS, "forecast horizon rejected");
            return Outcome::Fallback(Vec::new(), FallbackReason::HorizonTooLong(horizon_days));
        }
        if let Err(error) = self.train() {
            let reason = match error {
                AppError::InsufficientData(_) => FallbackReason::InsufficientSamples(self.history.len()),
                other => FallbackReason::ModelFitting(other.to_string()),
            };
            return Outcome::Fallback(Vec::new(), reason);
        }
        let ForecasterState::Trained(model) = &self.state else {
            return Outcome::Fallback(
                Vec::new(),
                FallbackReason::ModelFitting("model is untrained".to_string()),
            );
        };

        let mut points = Vec::with_capacity(horizon_days);
        for step in 1..=horizon_days as i64 {
            let date = model.last_observed + Duration::days(step);
            let mean = model.mean_at(date);
            let upper = model.upper_at(date);
            if !mean.is_finite() || !upper.is_finite() {
                tracing::error!(date = %date, "forecast produced non-finite values");
                return Outcome::Fallback(
                    Vec::new(),
                    FallbackReason::ModelFitting(format!("non-finite forecast for {}", date)),
                );
            }
            points.push(self.risk.evaluate(date, round_tenth(mean), round_tenth(upper)));
        }

        let at_risk = points.iter().filter(|point| point.at_risk).count();
        if at_risk > 0 {
            tracing::warn!(days = at_risk, threshold = self.risk.threshold(), "risk predicted");
        }
        Outcome::Ok(points)
    }
}

fn round_tenth(value: f64) -> f64 {
    (value.max(0.0) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticSource;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 2).expect("date")
    }

    fn flat(days: i64, count: u32) -> Vec<ActivitySample> {
        (0..days)
            .map(|offset| ActivitySample {
                date: start() + Duration::days(offset),
                count,
            })
            .collect()
    }

    #[test]
    fn too_little_history_yields_empty_forecast() {
        let mut forecaster = TimeSeriesForecaster::new(flat(6, 3), RiskEvaluator::new(10));
        assert!(matches!(forecaster.train(), Err(AppError::InsufficientData(_))));
        assert!(!forecaster.is_trained());

        let outcome = forecaster.predict(7);
        assert!(outcome.data().is_empty());
        assert_eq!(outcome.reason(), Some(&FallbackReason::InsufficientSamples(6)));
    }

    #[test]
    fn predict_trains_lazily_and_returns_horizon_rows() {
        let mut forecaster = TimeSeriesForecaster::new(flat(21, 4), RiskEvaluator::new(10));
        assert!(!forecaster.is_trained());

        let points = forecaster.predict(5).into_data();
        assert!(forecaster.is_trained());
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].date, start() + Duration::days(21));
        assert!(points.iter().all(|point| (point.predicted - 4.0).abs() < 1e-9));
    }

    #[test]
    fn synthetic_history_respects_forecast_invariants() {
        let history = SyntheticSource.series(start());
        let risk = RiskEvaluator::new(10);
        let mut forecaster = TimeSeriesForecaster::new(history, risk);

        let points = forecaster.predict(14).into_data();
        assert_eq!(points.len(), 14);
        for point in &points {
            assert!(point.predicted >= 0.0);
            assert!(point.upper_bound >= point.predicted);
            assert_eq!(point.at_risk, point.upper_bound > risk.threshold());
            assert_eq!(point.at_risk, !point.recommendation.is_empty());
        }
    }

    #[test]
    fn declining_trend_is_clamped_at_zero() {
        let history: Vec<ActivitySample> = (0..14)
            .map(|offset| ActivitySample {
                date: start() + Duration::days(offset),
                count: (28 - 2 * offset) as u32,
            })
            .collect();
        let mut forecaster = TimeSeriesForecaster::new(history, RiskEvaluator::new(10));

        let points = forecaster.predict(30).into_data();
        let last = points.last().expect("forecast rows");
        assert_eq!(last.predicted, 0.0);
        assert!(last.upper_bound >= 0.0);
    }

    #[test]
    fn oversized_horizon_is_rejected_without_training() {
        let mut forecaster = TimeSeriesForecaster::new(flat(10, 5), RiskEvaluator::new(10));
        let outcome = forecaster.predict(200_000_000);
        assert!(outcome.data().is_empty());
        assert_eq!(outcome.reason(), Some(&FallbackReason::HorizonTooLong(200_000_000)));
        assert!(!forecaster.is_trained());

        assert_eq!(forecaster.predict(MAX_HORIZON_DAYS).data().len(), MAX_HORIZON_DAYS);
    }

    #[test]
    fn zero_horizon_is_empty_but_not_a_fallback() {
        let mut forecaster = TimeSeriesForecaster::new(flat(10, 5), RiskEvaluator::new(10));
        assert_eq!(forecaster.predict(0), Outcome::Ok(Vec::new()));
    }
}
