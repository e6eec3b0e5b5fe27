use crate::config::TrackerSettings;
use crate::errors::{AppError, AppResult};
use crate::models::{ChecklistItem, TaskRecord, DATE_FORMAT};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

/// Narrow view of the project tracker: a pull of every card on the board.
pub trait TrackerClient {
    fn fetch_records(&self) -> AppResult<Vec<TaskRecord>>;
}

impl<C: TrackerClient + ?Sized> TrackerClient for &C {
    fn fetch_records(&self) -> AppResult<Vec<TaskRecord>> {
        (**self).fetch_records()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrelloCard {
    id: String,
    #[serde(default)]
    name: String,
    due: Option<String>,
    date_last_activity: Option<String>,
    #[serde(default)]
    checklists: Option<Vec<TrelloChecklist>>,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrelloChecklist {
    #[serde(default)]
    check_items: Vec<TrelloCheckItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct TrelloCheckItem {
    #[serde(default)]
    state: String,
}

pub struct TrelloClient {
    agent: ureq::Agent,
    settings: TrackerSettings,
}

impl TrelloClient {
    pub fn new(settings: TrackerSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Self { agent, settings }
    }

    fn credentials(&self) -> AppResult<(&str, &str, &str)> {
        match (
            self.settings.api_key.as_deref(),
            self.settings.token.as_deref(),
            self.settings.board_id.as_deref(),
        ) {
            (Some(key), Some(token), Some(board)) => Ok((key, token, board)),
            _ => Err(AppError::DataUnavailable(
                "tracker credentials are not configured".to_string(),
            )),
        }
    }
}

impl TrackerClient for TrelloClient {
    fn fetch_records(&self) -> AppResult<Vec<TaskRecord>> {
        let (key, token, board) = self.credentials()?;
        let url = format!(
            "{}/boards/{}/cards",
            self.settings.base_url.trim_end_matches('/'),
            board
        );

        let cards: Vec<TrelloCard> = match self
            .agent
            .get(&url)
            .query("key", key)
            .query("token", token)
            .query("checklists", "all")
            .query("fields", "name,due,dateLastActivity,checklists,closed")
            .call()
        {
            Ok(response) => response
                .into_json()
                .map_err(|error| AppError::DataUnavailable(format!("malformed card list: {}", error)))?,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let preview: String = body.chars().take(200).collect();
                return Err(AppError::DataUnavailable(format!(
                    "tracker returned HTTP {}: {}",
                    code, preview
                )));
            }
            Err(error) => return Err(error.into()),
        };

        tracing::info!(cards = cards.len(), "fetched tracker cards");
        Ok(cards.into_iter().map(card_to_record).collect())
    }
}

fn card_to_record(card: TrelloCard) -> TaskRecord {
    let due = card.due.as_deref().and_then(|raw| {
        let parsed = parse_tracker_date(raw);
        if parsed.is_none() {
            tracing::warn!(card_id = %card.id, raw = %raw, "ignoring unparsable due date");
        }
        parsed
    });
    let last_activity = card.date_last_activity.as_deref().and_then(|raw| {
        let parsed = parse_tracker_timestamp(raw);
        if parsed.is_none() {
            tracing::warn!(card_id = %card.id, raw = %raw, "ignoring unparsable activity timestamp");
        }
        parsed
    });
    let checklist = card.checklists.map(|lists| {
        lists
            .iter()
            .flat_map(|list| list.check_items.iter())
            .map(|item| ChecklistItem {
                complete: item.state == "complete",
            })
            .collect()
    });

    TaskRecord {
        id: card.id,
        title: card.name,
        due,
        checklist,
        last_activity,
        closed: card.closed,
    }
}

pub fn parse_tracker_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

pub fn parse_tracker_date(raw: &str) -> Option<NaiveDate> {
    parse_tracker_timestamp(raw)
        .map(|value| value.date_naive())
        .or_else(|| NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok())
}
