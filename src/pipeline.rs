use crate::config::AnalyticsConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::features::FeatureEngineer;
use crate::forecast::TimeSeriesForecaster;
use crate::ingest::{ActivityIngestor, ActivitySource};
use crate::models::{FallbackReason, ForecastPoint, Outcome, ScoredTask, Task, TaskRecord};
use crate::priority::PriorityScorer;
use crate::risk::RiskEvaluator;
use crate::tracker::TrackerClient;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

/// One batch run: ingest, forecast and score, then persist through the store.
pub struct Pipeline<S> {
    config: AnalyticsConfig,
    ingestor: ActivityIngestor<S>,
    scorer: PriorityScorer,
    db: Database,
    today: NaiveDate,
}

impl<S: ActivitySource> Pipeline<S> {
    pub fn new(config: AnalyticsConfig, source: S, db: Database) -> Self {
        Self {
            config,
            ingestor: ActivityIngestor::new(source),
            scorer: PriorityScorer::default(),
            db,
            today: Utc::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persists the forecast unless forecasting itself degraded to no rows,
    /// in which case the previously stored forecast is left untouched.
    pub fn run_forecast(&self, horizon_days: usize) -> AppResult<Outcome<Vec<ForecastPoint>>> {
        let ingested = self.ingestor.fetch_on(self.config.forecast_window_days, self.today);
        let ingest_reason = ingested.reason().cloned();

        let mut forecaster = TimeSeriesForecaster::new(
            ingested.into_data(),
            RiskEvaluator::new(self.config.risk_threshold),
        );
        let points = match forecaster.predict(horizon_days) {
            Outcome::Fallback(points, reason) => {
                tracing::warn!(reason = %reason, "forecast degraded, keeping stored forecast");
                return Ok(Outcome::Fallback(points, reason));
            }
            Outcome::Ok(points) => points,
        };

        self.db.save_forecast(&points)?;
        Ok(match ingest_reason {
            Some(reason) => Outcome::Fallback(points, reason),
            None => Outcome::Ok(points),
        })
    }

    /// Fetches the backlog and scores it. An unreachable tracker leaves the
    /// stored priorities untouched.
    pub fn score_backlog<C: TrackerClient>(&self, client: &C) -> AppResult<Outcome<Vec<ScoredTask>>> {
        match client.fetch_records() {
            Ok(records) => self.run_scoring(&records),
            Err(error) => {
                tracing::warn!(error = %error, "tracker unavailable, keeping stored tasks");
                Ok(Outcome::Fallback(
                    Vec::new(),
                    FallbackReason::SourceUnavailable(error.to_string()),
                ))
            }
        }
    }

    /// Scores the records and replaces the stored tasks. Records sharing an id
    /// collapse to the last one; an empty backlog writes nothing.
    pub fn run_scoring(&self, records: &[TaskRecord]) -> AppResult<Outcome<Vec<ScoredTask>>> {
        let mut tasks: Vec<Task> = Vec::with_capacity(records.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in records {
            let task = match Task::from_record(record, self.today) {
                Ok(task) => task,
                Err(error) => {
                    tracing::warn!(task_id = %record.id, error = %error, "skipping invalid task record");
                    continue;
                }
            };
            match positions.get(&task.id) {
                Some(&position) => {
                    tracing::warn!(task_id = %task.id, "duplicate task id, keeping the later record");
                    tasks[position] = task;
                }
                None => {
                    positions.insert(task.id.clone(), tasks.len());
                    tasks.push(task);
                }
            }
        }

        if tasks.is_empty() {
            tracing::warn!(records = records.len(), "no valid tasks, keeping stored tasks");
            return Ok(Outcome::Fallback(Vec::new(), FallbackReason::EmptyBacklog));
        }

        let scored = match FeatureEngineer::new(self.today)
            .derive(&tasks)
            .and_then(|features| self.scorer.prioritize(&features))
        {
            Ok(outcome) => outcome,
            Err(AppError::MissingCriticalField(detail)) => {
                tracing::error!(error = %detail, "task scoring failed, returning no tasks");
                return Ok(Outcome::Fallback(Vec::new(), FallbackReason::MissingFeature(detail)));
            }
            Err(error) => return Err(error),
        };

        self.db.save_tasks(scored.data())?;
        Ok(scored)
    }
}
