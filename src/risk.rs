use crate::models::ForecastPoint;
use chrono::NaiveDate;

/// Flags forecast days whose upper bound exceeds the sustainable daily volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskEvaluator {
    threshold: f64,
}

impl RiskEvaluator {
    pub fn new(risk_threshold: i64) -> Self {
        Self {
            threshold: risk_threshold as f64,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn evaluate(&self, date: NaiveDate, predicted: f64, upper_bound: f64) -> ForecastPoint {
        let at_risk = upper_bound > self.threshold;
        let recommendation = if at_risk {
            let excess = (upper_bound - self.threshold).floor() as i64;
            format!("Reduce scope by {} tasks", excess)
        } else {
            String::new()
        };

        ForecastPoint {
            date,
            predicted,
            upper_bound,
            at_risk,
            recommendation,
        }
    }
}
