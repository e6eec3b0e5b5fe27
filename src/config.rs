use crate::errors::{AppError, AppResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TRELLO_BASE_URL: &str = "https://api.trello.com/1";

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub board_id: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl TrackerSettings {
    /// Credentials are optional; without all three the tracker is treated as unreachable.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.token.is_some() && self.board_id.is_some()
    }
}

/// Sentiment cut-offs consumed by the sentiment reporting side, carried unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentThresholds {
    pub positive: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub risk_threshold: i64,
    pub sentiment: SentimentThresholds,
    pub tracker: TrackerSettings,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub forecast_window_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 10,
            sentiment: SentimentThresholds {
                positive: 0.25,
                critical: 0.15,
            },
            tracker: TrackerSettings {
                api_key: None,
                token: None,
                board_id: None,
                base_url: DEFAULT_TRELLO_BASE_URL.to_string(),
                timeout: Duration::from_secs(10),
            },
            database_path: PathBuf::from("sprints.db"),
            log_dir: PathBuf::from("logs"),
            forecast_window_days: 60,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let timeout_secs = parse_or(&text, "TRACKER_TIMEOUT_SECS", defaults.tracker.timeout.as_secs())?;
        let forecast_window_days = parse_or(&text, "FORECAST_WINDOW_DAYS", defaults.forecast_window_days)?;
        if forecast_window_days <= 0 {
            return Err(AppError::Config(
                "FORECAST_WINDOW_DAYS must be positive".to_string(),
            ));
        }

        Ok(Self {
            risk_threshold: parse_or(&text, "RISK_THRESHOLD", defaults.risk_threshold)?,
            sentiment: SentimentThresholds {
                positive: parse_or(&text, "POSITIVE_THRESHOLD", defaults.sentiment.positive)?,
                critical: parse_or(&text, "CRITICAL_THRESHOLD", defaults.sentiment.critical)?,
            },
            tracker: TrackerSettings {
                api_key: text("TRELLO_API_KEY"),
                token: text("TRELLO_TOKEN"),
                board_id: text("TRELLO_BOARD_ID"),
                base_url: text("TRELLO_BASE_URL").unwrap_or(defaults.tracker.base_url),
                timeout: Duration::from_secs(timeout_secs),
            },
            database_path: text("SPRINT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            log_dir: text("SPRINT_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            forecast_window_days,
        })
    }
}

fn parse_or<T, F>(text: &F, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match text(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|error| AppError::Config(format!("{}='{}': {}", key, raw, error))),
        None => Ok(default),
    }
}
