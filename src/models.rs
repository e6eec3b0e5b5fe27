use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Days added to "today" when a task arrives without a due date.
pub const DEFAULT_DUE_OFFSET_DAYS: i64 = 14;

/// Date format used for every persisted and rendered calendar day.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySample {
    pub date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted: f64,
    pub upper_bound: f64,
    pub at_risk: bool,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub complete: bool,
}

/// One card as handed over by the tracker client, before any defaulting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub due: Option<NaiveDate>,
    pub checklist: Option<Vec<ChecklistItem>>,
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed: bool,
}

impl TaskRecord {
    pub fn checklist_len(&self) -> usize {
        self.checklist.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// A task after defaulting and coercion. Carries no priority until scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub due_date: NaiveDate,
    pub checklist_count: u32,
}

impl Task {
    /// Applies every defaulting rule once: a missing due date becomes
    /// `today + 14 days`, a missing checklist counts as zero items.
    pub fn from_record(record: &TaskRecord, today: NaiveDate) -> AppResult<Self> {
        let id = record.id.trim();
        if id.is_empty() {
            return Err(AppError::MissingCriticalField("task id is empty".to_string()));
        }
        let title = record.title.trim();
        if title.is_empty() {
            return Err(AppError::MissingCriticalField(format!(
                "task '{}' has no title",
                id
            )));
        }
        let checklist_count = u32::try_from(record.checklist_len()).map_err(|_| {
            AppError::MissingCriticalField(format!("checklist count out of range for task '{}'", id))
        })?;

        Ok(Self {
            id: id.to_string(),
            title: title.to_string(),
            due_date: record
                .due
                .unwrap_or_else(|| today + Duration::days(DEFAULT_DUE_OFFSET_DAYS)),
            checklist_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFeatures {
    pub task: Task,
    pub days_until_due: i64,
    pub complexity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredTask {
    pub id: String,
    pub title: String,
    pub due_date: NaiveDate,
    pub checklist_count: u32,
    pub priority: f64,
}

/// Read-side view of a scored task with the due date already rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub due_date: String,
    pub checklist_count: u32,
    pub priority: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    pub version: i64,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentRecord {
    pub recorded_at: DateTime<Utc>,
    pub label: String,
    pub score: f64,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRecord {
    pub sprint_start: NaiveDate,
    pub capacity: i64,
}

/// Why a step degraded to substitute data instead of its normal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum FallbackReason {
    SourceUnavailable(String),
    InsufficientSamples(usize),
    ModelFitting(String),
    MissingFeature(String),
    TooFewTasks(usize),
    EmptyBacklog,
    HorizonTooLong(usize),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable(detail) => write!(f, "source unavailable: {}", detail),
            Self::InsufficientSamples(found) => write!(f, "only {} activity samples", found),
            Self::ModelFitting(detail) => write!(f, "model fitting failed: {}", detail),
            Self::MissingFeature(detail) => write!(f, "missing feature: {}", detail),
            Self::TooFewTasks(count) => write!(f, "only {} tasks, heuristic scoring used", count),
            Self::EmptyBacklog => write!(f, "no valid tasks to score"),
            Self::HorizonTooLong(days) => write!(f, "horizon of {} days exceeds the forecast limit", days),
        }
    }
}

/// Result of a step that may have degraded. Hard failures stay in `AppResult`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Fallback(T, FallbackReason),
}

impl<T> Outcome<T> {
    pub fn data(&self) -> &T {
        match self {
            Self::Ok(data) | Self::Fallback(data, _) => data,
        }
    }

    pub fn into_data(self) -> T {
        match self {
            Self::Ok(data) | Self::Fallback(data, _) => data,
        }
    }

    pub fn reason(&self) -> Option<&FallbackReason> {
        match self {
            Self::Ok(_) => None,
            Self::Fallback(_, reason) => Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(..))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Ok(data) => Outcome::Ok(f(data)),
            Self::Fallback(data, reason) => Outcome::Fallback(f(data), reason),
        }
    }
}
