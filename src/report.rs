use crate::models::{ForecastPoint, TaskRecord, TaskSummary, DATE_FORMAT};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// More open blockers than this asks for immediate attention.
const BLOCKER_ALERT_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SprintHealth {
    Blocked,
    AtRisk,
    Stable,
}

impl SprintHealth {
    pub fn message(self) -> &'static str {
        match self {
            Self::Blocked => "Immediate attention needed: multiple blockers detected",
            Self::AtRisk => "High risk predicted: consider scope adjustment",
            Self::Stable => "Stable trajectory: maintain current pace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintReport {
    pub sprint_start: NaiveDate,
    pub sprint_end: NaiveDate,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub blockers: usize,
    pub risk_forecast: Vec<ForecastPoint>,
    pub health: SprintHealth,
}

impl SprintReport {
    /// Summarises the last seven days of tracker records against the stored forecast.
    pub fn build(records: &[TaskRecord], forecast: Vec<ForecastPoint>, today: NaiveDate) -> Self {
        let blockers = records
            .iter()
            .filter(|record| record.title.to_lowercase().contains("blocker"))
            .count();
        let health = if blockers > BLOCKER_ALERT_COUNT {
            SprintHealth::Blocked
        } else if forecast.last().map(|point| point.at_risk).unwrap_or(false) {
            SprintHealth::AtRisk
        } else {
            SprintHealth::Stable
        };

        Self {
            sprint_start: today - Duration::days(7),
            sprint_end: today,
            total_tasks: records.len(),
            completed_tasks: records.iter().filter(|record| record.closed).count(),
            blockers,
            risk_forecast: forecast,
            health,
        }
    }

    pub fn completion_ratio(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.completed_tasks as f64 / self.total_tasks as f64
    }

    pub fn to_markdown(&self) -> String {
        format!(
            "## Sprint Report ({} to {})\n\n**Tasks Overview**\n- Total Tasks: {}\n- Completed: {} ({:.0}%)\n- Active Blockers: {}\n\n**Risk Forecast**\n{}\n**Recommendations**\n{}\n",
            self.sprint_start.format(DATE_FORMAT),
            self.sprint_end.format(DATE_FORMAT),
            self.total_tasks,
            self.completed_tasks,
            self.completion_ratio() * 100.0,
            self.blockers,
            forecast_table(&self.risk_forecast),
            self.health.message(),
        )
    }
}

pub fn forecast_table(points: &[ForecastPoint]) -> String {
    let rows: Vec<Vec<String>> = points
        .iter()
        .map(|point| {
            vec![
                point.date.format(DATE_FORMAT).to_string(),
                format!("{:.1}", point.predicted),
                format!("{:.1}", point.upper_bound),
                point.at_risk.to_string(),
                point.recommendation.clone(),
            ]
        })
        .collect();
    markdown_table(&["date", "predicted", "upper_bound", "at_risk", "recommendation"], &rows)
}

pub fn task_table(tasks: &[TaskSummary]) -> String {
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|task| {
            vec![
                task.title.clone(),
                task.due_date.clone(),
                task.checklist_count.to_string(),
                format!("{:.2}", task.priority),
            ]
        })
        .collect();
    markdown_table(&["title", "due_date", "checklist_count", "priority"], &rows)
}

pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let escape = |cell: &str| cell.replace('|', "\\|");
    let mut out = format!("| {} |\n", headers.join(" | "));
    out.push_str(&format!("|{}\n", "---|".repeat(headers.len())));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|cell| escape(cell.as_str())).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 12).expect("date")
    }

    fn record(title: &str, closed: bool) -> TaskRecord {
        TaskRecord {
            id: title.to_string(),
            title: title.to_string(),
            closed,
            ..TaskRecord::default()
        }
    }

    fn risky(at_risk: bool) -> ForecastPoint {
        ForecastPoint {
            date: today() + Duration::days(1),
            predicted: 9.0,
            upper_bound: if at_risk { 12.3 } else { 9.5 },
            at_risk,
            recommendation: if at_risk { "Reduce scope by 2 tasks".to_string() } else { String::new() },
        }
    }

    #[test]
    fn counts_blockers_and_completed_cards() {
        let records = vec![
            record("Blocker: API issue", false),
            record("Regular task", true),
            record("another BLOCKER", false),
        ];
        let report = SprintReport::build(&records, vec![risky(false)], today());
        assert_eq!(report.total_tasks, 3);
        assert_eq!(report.completed_tasks, 1);
        assert_eq!(report.blockers, 2);
        assert_eq!(report.health, SprintHealth::Stable);
        assert_eq!(report.sprint_start, today() - Duration::days(7));
    }

    #[test]
    fn blockers_outrank_forecast_risk() {
        let records: Vec<TaskRecord> = (0..4).map(|i| record(&format!("blocker {}", i), false)).collect();
        assert_eq!(
            SprintReport::build(&records, vec![risky(true)], today()).health,
            SprintHealth::Blocked
        );
        assert_eq!(
            SprintReport::build(&[], vec![risky(true)], today()).health,
            SprintHealth::AtRisk
        );
    }

    #[test]
    fn markdown_contains_forecast_rows() {
        let report = SprintReport::build(&[record("a", true)], vec![risky(true)], today());
        let text = report.to_markdown();
        assert!(text.contains("## Sprint Report (2026-10-05 to 2026-10-12)"));
        assert!(text.contains("| 2026-10-13 | 9.0 | 12.3 | true | Reduce scope by 2 tasks |"));
        assert!(text.contains("Completed: 1 (100%)"));
    }

    #[test]
    fn table_cells_escape_pipes() {
        let table = markdown_table(&["title"], &[vec!["a|b".to_string()]]);
        assert_eq!(table, "| title |\n|---|\n| a\\|b |\n");
    }
}
