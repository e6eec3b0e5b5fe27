use crate::ensemble::{ForestParams, RegressionForest};
use crate::errors::{AppError, AppResult};
use crate::models::{FallbackReason, Outcome, ScoredTask, TaskFeatures};
use rand::Rng;

/// Below this many tasks the closed-form heuristic is used instead of the model branch.
pub const MODEL_MIN_TASKS: usize = 3;

pub struct PriorityScorer {
    params: ForestParams,
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self::new(ForestParams::default())
    }
}

impl PriorityScorer {
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    /// Scores and sorts tasks by descending priority, rounded to two decimals.
    ///
    /// The heuristic branch yields an unbounded ordering score; the model
    /// branch min-max normalises into `[0, 1]`.
    pub fn prioritize(&self, features: &[TaskFeatures]) -> AppResult<Outcome<Vec<ScoredTask>>> {
        validate(features)?;

        if features.len() < MODEL_MIN_TASKS {
            tracing::warn!(tasks = features.len(), "too few tasks for model scoring, using heuristic");
            let scored = features
                .iter()
                .map(|feature| {
                    let score = 0.7 / (feature.days_until_due as f64 + 1.0)
                        + 0.3 * f64::from(feature.task.checklist_count);
                    to_scored(feature, score)
                })
                .collect();
            return Ok(Outcome::Fallback(
                sort_descending(scored),
                FallbackReason::TooFewTasks(features.len()),
            ));
        }

        self.fit_model(features);

        let raw: Vec<f64> = features
            .iter()
            .map(|feature| {
                0.6 * f64::from(feature.task.checklist_count)
                    + 0.4 / (feature.days_until_due as f64 + 1.0)
            })
            .collect();
        let scored = features
            .iter()
            .zip(normalize(&raw))
            .map(|(feature, score)| to_scored(feature, score))
            .collect();
        Ok(Outcome::Ok(sort_descending(scored)))
    }

    // The fitted forest never feeds the persisted priority; its in-sample
    // error is only logged. The target noise is unseeded on purpose and must
    // be seeded before the forest output is ever used as the score.
    fn fit_model(&self, features: &[TaskFeatures]) -> Option<RegressionForest> {
        let mut rng = rand::rng();
        let rows: Vec<Vec<f64>> = features
            .iter()
            .map(|feature| vec![feature.days_until_due as f64, feature.complexity])
            .collect();
        let targets: Vec<f64> = features
            .iter()
            .map(|feature| {
                f64::from(feature.task.checklist_count) * 0.8
                    + rng.random_range(0.0..0.2)
                    + 1.0 / (feature.days_until_due as f64 / 7.0 + 0.1)
            })
            .collect();

        match RegressionForest::fit(&rows, &targets, self.params) {
            Ok(forest) => {
                tracing::info!(
                    tasks = features.len(),
                    trees = forest.len(),
                    mse = forest.mean_squared_error(&rows, &targets),
                    "priority model fitted"
                );
                Some(forest)
            }
            Err(error) => {
                tracing::warn!(error = %error, "priority model fit failed");
                None
            }
        }
    }
}

fn validate(features: &[TaskFeatures]) -> AppResult<()> {
    for feature in features {
        if feature.days_until_due < 0 {
            return Err(AppError::MissingCriticalField(format!(
                "days_until_due undefined for task '{}'",
                feature.task.id
            )));
        }
        if !feature.complexity.is_finite() {
            return Err(AppError::MissingCriticalField(format!(
                "complexity undefined for task '{}'",
                feature.task.id
            )));
        }
    }
    Ok(())
}

fn normalize(raw: &[f64]) -> Vec<f64> {
    let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= f64::EPSILON {
        return vec![0.5; raw.len()];
    }
    raw.iter().map(|value| (value - min) / range).collect()
}

fn to_scored(feature: &TaskFeatures, score: f64) -> ScoredTask {
    ScoredTask {
        id: feature.task.id.clone(),
        title: feature.task.title.clone(),
        due_date: feature.task.due_date,
        checklist_count: feature.task.checklist_count,
        priority: (score * 100.0).round() / 100.0,
    }
}

fn sort_descending(mut scored: Vec<ScoredTask>) -> Vec<ScoredTask> {
    scored.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use chrono::{Duration, NaiveDate};

    fn feature(id: &str, days: i64, items: u32) -> TaskFeatures {
        let today = NaiveDate::from_ymd_opt(2026, 8, 3).expect("date");
        TaskFeatures {
            task: Task {
                id: id.to_string(),
                title: format!("Task {}", id),
                due_date: today + Duration::days(days),
                checklist_count: items,
            },
            days_until_due: days,
            complexity: f64::from(items.max(1)).ln_1p(),
        }
    }

    #[test]
    fn two_tasks_use_unnormalised_heuristic() {
        let outcome = PriorityScorer::default()
            .prioritize(&[feature("far", 20, 1), feature("near", 1, 5)])
            .expect("scores");

        assert_eq!(outcome.reason(), Some(&FallbackReason::TooFewTasks(2)));
        let scored = outcome.into_data();
        assert_eq!(scored[0].id, "near");
        assert_eq!(scored[0].priority, 1.85);
        assert_eq!(scored[1].priority, 0.33);
    }

    #[test]
    fn model_branch_normalises_into_unit_range() {
        let features = vec![
            feature("a", 1, 5),
            feature("b", 3, 2),
            feature("c", 10, 0),
            feature("d", 30, 4),
        ];
        let outcome = PriorityScorer::default().prioritize(&features).expect("scores");
        assert!(!outcome.is_fallback());

        let scored = outcome.into_data();
        assert_eq!(scored.len(), 4);
        assert_eq!(scored[0].id, "a");
        assert_eq!(scored[0].priority, 1.0);
        assert_eq!(scored.last().map(|task| task.priority), Some(0.0));
        assert!(scored.iter().all(|task| (0.0..=1.0).contains(&task.priority)));
        assert!(scored.windows(2).all(|pair| pair[0].priority >= pair[1].priority));
    }

    #[test]
    fn identical_tasks_normalise_to_half() {
        let features: Vec<TaskFeatures> = (0..4).map(|i| feature(&i.to_string(), 6, 3)).collect();
        let scored = PriorityScorer::default()
            .prioritize(&features)
            .expect("scores")
            .into_data();
        assert!(scored.iter().all(|task| task.priority == 0.5));
    }

    #[test]
    fn empty_input_is_empty_output() {
        let outcome = PriorityScorer::default().prioritize(&[]).expect("scores");
        assert!(outcome.data().is_empty());
    }

    #[test]
    fn undefined_features_are_rejected() {
        let mut broken = feature("x", 2, 1);
        broken.complexity = f64::NAN;
        let error = PriorityScorer::default()
            .prioritize(&[broken])
            .expect_err("missing feature");
        assert!(matches!(error, AppError::MissingCriticalField(_)));
    }
}
