use crate::errors::{AppError, AppResult};
use crate::models::{
    CapacityRecord, ForecastPoint, ScoredTask, SchemaVersion, SentimentRecord, TaskSummary, DATE_FORMAT,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

/// Applied in order; a step runs only when the recorded maximum version is below it.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "forecast and task tables",
        sql: "CREATE TABLE IF NOT EXISTS forecasts (
                date TEXT PRIMARY KEY,
                predicted REAL NOT NULL,
                upper_bound REAL NOT NULL,
                at_risk INTEGER NOT NULL,
                recommendation TEXT NOT NULL DEFAULT ''
              );
              CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                due_date TEXT NOT NULL,
                checklist_count INTEGER NOT NULL,
                priority REAL NOT NULL
              );",
    },
    Migration {
        version: 2,
        description: "forecast date and task priority indexes",
        sql: "CREATE INDEX IF NOT EXISTS idx_forecasts_date ON forecasts(date);
              CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);",
    },
    Migration {
        version: 3,
        description: "sentiment history",
        sql: "CREATE TABLE IF NOT EXISTS sentiment_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                label TEXT NOT NULL,
                score REAL NOT NULL,
                source TEXT NOT NULL DEFAULT ''
              );
              CREATE INDEX IF NOT EXISTS idx_sentiment_recorded ON sentiment_history(recorded_at DESC);",
    },
    Migration {
        version: 4,
        description: "team capacity per sprint",
        sql: "CREATE TABLE IF NOT EXISTS team_capacity (
                sprint_start TEXT PRIMARY KEY,
                capacity INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
              );",
    },
];

pub fn latest_schema_version() -> i64 {
    MIGRATIONS.last().map(|migration| migration.version).unwrap_or(0)
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
               version INTEGER PRIMARY KEY,
               applied_at TEXT NOT NULL
             );",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Persistence("database mutex poisoned".to_string()))
    }

    fn migrate(&self) -> AppResult<()> {
        let mut conn = self.lock()?;
        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        for migration in MIGRATIONS.iter().filter(|migration| migration.version > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql)?;
            tx.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![migration.version, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applied schema migration"
            );
        }

        let target = latest_schema_version();
        if current < target {
            tracing::info!(from = current, to = target, "database schema upgraded");
        }
        Ok(())
    }

    pub fn schema_versions(&self) -> Vec<SchemaVersion> {
        self.read_or_empty("schema_version", |conn| {
            let mut stmt = conn.prepare("SELECT version, applied_at FROM schema_version ORDER BY version ASC")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(SchemaVersion {
                        version: row.get(0)?,
                        applied_at: parse_time(&row.get::<_, String>(1)?)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replaces the whole forecast table in one transaction.
    pub fn save_forecast(&self, points: &[ForecastPoint]) -> AppResult<usize> {
        self.replace_table("forecasts", |tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO forecasts (date, predicted, upper_bound, at_risk, recommendation)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for point in points {
                stmt.execute(params![
                    point.date,
                    point.predicted,
                    point.upper_bound,
                    point.at_risk,
                    point.recommendation,
                ])?;
            }
            Ok(points.len())
        })
    }

    pub fn load_forecast(&self) -> Vec<ForecastPoint> {
        self.read_or_empty("forecasts", |conn| {
            let mut stmt = conn.prepare(
                "SELECT date, predicted, upper_bound, at_risk, recommendation
                 FROM forecasts ORDER BY date ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ForecastPoint {
                        date: row.get(0)?,
                        predicted: row.get(1)?,
                        upper_bound: row.get(2)?,
                        at_risk: row.get(3)?,
                        recommendation: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replaces the whole task table. Rows whose priority is not a finite
    /// number are dropped rather than written.
    pub fn save_tasks(&self, tasks: &[ScoredTask]) -> AppResult<usize> {
        self.replace_table("tasks", |tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO tasks (id, title, due_date, checklist_count, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut written = 0usize;
            for task in tasks {
                if !task.priority.is_finite() {
                    tracing::warn!(task_id = %task.id, "dropping task with unresolvable priority");
                    continue;
                }
                stmt.execute(params![
                    task.id,
                    task.title,
                    task.due_date.format(DATE_FORMAT).to_string(),
                    i64::from(task.checklist_count),
                    task.priority,
                ])?;
                written += 1;
            }
            Ok(written)
        })
    }

    pub fn load_tasks(&self) -> Vec<ScoredTask> {
        self.read_or_empty("tasks", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, due_date, checklist_count, priority
                 FROM tasks ORDER BY priority DESC, id ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ScoredTask {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        due_date: parse_date(&row.get::<_, String>(2)?)?,
                        checklist_count: row.get(3)?,
                        priority: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn top_priority_tasks(&self, limit: u32) -> Vec<TaskSummary> {
        self.read_or_empty("tasks", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, due_date, checklist_count, priority
                 FROM tasks ORDER BY priority DESC, id ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    let due_date = parse_date(&row.get::<_, String>(2)?)?;
                    Ok(TaskSummary {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        due_date: due_date.format(DATE_FORMAT).to_string(),
                        checklist_count: row.get(3)?,
                        priority: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn record_sentiment(&self, record: &SentimentRecord) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sentiment_history (recorded_at, label, score, source) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.recorded_at.to_rfc3339(),
                record.label,
                record.score,
                record.source
            ],
        )
        .map_err(|error| {
            tracing::error!(error = %error, "failed to record sentiment");
            AppError::from(error)
        })?;
        Ok(())
    }

    pub fn recent_sentiment(&self, limit: u32) -> Vec<SentimentRecord> {
        self.read_or_empty("sentiment_history", |conn| {
            let mut stmt = conn.prepare(
                "SELECT recorded_at, label, score, source
                 FROM sentiment_history ORDER BY recorded_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(SentimentRecord {
                        recorded_at: parse_time(&row.get::<_, String>(0)?)?,
                        label: row.get(1)?,
                        score: row.get(2)?,
                        source: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_capacity(&self, record: CapacityRecord) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO team_capacity (sprint_start, capacity, recorded_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(sprint_start) DO UPDATE SET
               capacity = excluded.capacity,
               recorded_at = excluded.recorded_at",
            params![record.sprint_start, record.capacity, Utc::now().to_rfc3339()],
        )
        .map_err(|error| {
            tracing::error!(error = %error, "failed to store team capacity");
            AppError::from(error)
        })?;
        Ok(())
    }

    pub fn capacity_for(&self, sprint_start: NaiveDate) -> Option<CapacityRecord> {
        let result = self.lock().and_then(|conn| {
            conn.query_row(
                "SELECT sprint_start, capacity FROM team_capacity WHERE sprint_start = ?1",
                [sprint_start],
                |row| {
                    Ok(CapacityRecord {
                        sprint_start: row.get(0)?,
                        capacity: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(AppError::from)
        });
        match result {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(error = %error, "capacity lookup failed");
                None
            }
        }
    }

    fn replace_table<F>(&self, table: &str, write: F) -> AppResult<usize>
    where
        F: FnOnce(&Transaction<'_>) -> AppResult<usize>,
    {
        let result = self.lock().and_then(|mut conn| {
            let tx = conn.transaction()?;
            tx.execute(&format!("DELETE FROM {}", table), [])?;
            let written = write(&tx)?;
            tx.commit()?;
            Ok(written)
        });
        match &result {
            Ok(written) => tracing::info!(table = table, rows = *written, "table replaced"),
            Err(error) => tracing::error!(table = table, error = %error, "table replace rolled back"),
        }
        result
    }

    fn read_or_empty<T, F>(&self, table: &str, read: F) -> Vec<T>
    where
        F: FnOnce(&Connection) -> AppResult<Vec<T>>,
    {
        match self.lock().and_then(|conn| read(&conn)) {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(table = table, error = %error, "read failed, returning no rows");
                Vec::new()
            }
        }
    }
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).map_err(|error| conversion_error(error.to_string()))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

#[cfg(test)]
mod tests {
    use super::{latest_schema_version, Database};
    use crate::models::{CapacityRecord, ForecastPoint, ScoredTask, SentimentRecord};
    use chrono::{Duration, NaiveDate, Utc};
    use rusqlite::Connection;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 1).expect("date") + Duration::days(offset)
    }

    fn point(offset: i64, upper: f64) -> ForecastPoint {
        ForecastPoint {
            date: day(offset),
            predicted: 6.5,
            upper_bound: upper,
            at_risk: upper > 10.0,
            recommendation: if upper > 10.0 {
                format!("Reduce scope by {} tasks", (upper - 10.0).floor() as i64)
            } else {
                String::new()
            },
        }
    }

    fn scored(id: &str, priority: f64) -> ScoredTask {
        ScoredTask {
            id: id.to_string(),
            title: format!("Task {}", id),
            due_date: day(7),
            checklist_count: 2,
            priority,
        }
    }

    #[test]
    fn reopening_does_not_duplicate_schema_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("sprints.db");

        drop(Database::new(&db_path).expect("first open"));
        let db = Database::new(&db_path).expect("second open");

        let versions: Vec<i64> = db.schema_versions().iter().map(|row| row.version).collect();
        let expected: Vec<i64> = (1..=latest_schema_version()).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn forecast_round_trips_and_replaces_previous_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        db.save_forecast(&[point(0, 8.0), point(1, 12.4), point(2, 9.9)])
            .expect("first save");
        db.save_forecast(&[point(5, 11.0)]).expect("second save");

        let loaded = db.load_forecast();
        assert_eq!(loaded, vec![point(5, 11.0)]);
        assert_eq!(loaded[0].recommendation, "Reduce scope by 1 tasks");
    }

    #[test]
    fn failed_forecast_write_keeps_previous_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let previous = vec![point(0, 8.0), point(1, 12.4)];
        db.save_forecast(&previous).expect("save");

        // Duplicate primary key fails on the second insert, after the delete.
        let result = db.save_forecast(&[point(3, 4.0), point(3, 5.0)]);
        assert!(result.is_err());
        assert_eq!(db.load_forecast(), previous);
    }

    #[test]
    fn tasks_drop_non_finite_priorities_and_sort_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let written = db
            .save_tasks(&[scored("a", 0.2), scored("b", f64::NAN), scored("c", 0.9), scored("d", 0.5)])
            .expect("save tasks");
        assert_eq!(written, 3);

        let ids: Vec<String> = db.load_tasks().into_iter().map(|task| task.id).collect();
        assert_eq!(ids, vec!["c", "d", "a"]);

        let top = db.top_priority_tasks(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, "c");
        assert_eq!(top[0].due_date, "2026-09-08");
    }

    #[test]
    fn reads_return_empty_when_table_is_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test.db");
        let db = Database::new(&db_path).expect("db");
        db.save_tasks(&[scored("a", 0.4)]).expect("save");

        let raw = Connection::open(&db_path).expect("raw connection");
        raw.execute_batch("DROP TABLE tasks; DROP TABLE forecasts;")
            .expect("drop tables");

        assert!(db.load_tasks().is_empty());
        assert!(db.top_priority_tasks(5).is_empty());
        assert!(db.load_forecast().is_empty());
        assert!(db.save_tasks(&[scored("b", 0.1)]).is_err());
    }

    #[test]
    fn sentiment_and_capacity_are_stored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let now = Utc::now();
        db.record_sentiment(&SentimentRecord {
            recorded_at: now - Duration::hours(1),
            label: "NEGATIVE".to_string(),
            score: 0.91,
            source: "standup".to_string(),
        })
        .expect("first sentiment");
        db.record_sentiment(&SentimentRecord {
            recorded_at: now,
            label: "POSITIVE".to_string(),
            score: 0.77,
            source: "retro".to_string(),
        })
        .expect("second sentiment");

        let recent = db.recent_sentiment(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].label, "POSITIVE");

        let record = CapacityRecord {
            sprint_start: day(0),
            capacity: 40,
        };
        db.set_capacity(record).expect("capacity");
        db.set_capacity(CapacityRecord { capacity: 35, ..record })
            .expect("capacity update");
        assert_eq!(db.capacity_for(day(0)).map(|row| row.capacity), Some(35));
        assert!(db.capacity_for(day(14)).is_none());
    }
}
