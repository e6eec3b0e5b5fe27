use crate::errors::{AppError, AppResult};
use crate::models::{Task, TaskFeatures};
use chrono::{NaiveDate, Utc};

pub struct FeatureEngineer {
    today: NaiveDate,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(Utc::now().date_naive())
    }
}

impl FeatureEngineer {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn derive(&self, tasks: &[Task]) -> AppResult<Vec<TaskFeatures>> {
        tasks.iter().map(|task| self.derive_one(task)).collect()
    }

    fn derive_one(&self, task: &Task) -> AppResult<TaskFeatures> {
        let days_until_due = (task.due_date - self.today).num_days().max(0);
        // Zero-item tasks score as one item so they do not all collapse to ln(1).
        let effective_items = task.checklist_count.max(1);
        let complexity = f64::from(effective_items).ln_1p();

        if !complexity.is_finite() {
            return Err(AppError::MissingCriticalField(format!(
                "complexity undefined for task '{}'",
                task.id
            )));
        }

        Ok(TaskFeatures {
            task: task.clone(),
            days_until_due,
            complexity,
        })
    }
}
