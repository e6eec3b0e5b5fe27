use crate::errors::{AppError, AppResult};
use crate::models::{ActivitySample, FallbackReason, Outcome, TaskRecord};
use crate::tracker::TrackerClient;
use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

/// Fewer real daily samples than this triggers the synthetic series.
pub const MIN_ACTIVITY_SAMPLES: usize = 7;

pub const SYNTHETIC_SEED: u64 = 42;
pub const SYNTHETIC_DAYS: usize = 60;

/// A source of daily activity counts covering `[today - window_days, today]`.
pub trait ActivitySource {
    fn daily_activity(&self, window_days: i64, today: NaiveDate) -> AppResult<Vec<ActivitySample>>;
}

/// Aggregates tracker cards into per-day checklist item counts.
pub struct TrackerActivity<C> {
    client: C,
}

impl<C: TrackerClient> TrackerActivity<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: TrackerClient> ActivitySource for TrackerActivity<C> {
    fn daily_activity(&self, window_days: i64, today: NaiveDate) -> AppResult<Vec<ActivitySample>> {
        let records = self.client.fetch_records()?;
        Ok(aggregate_daily_activity(&records, window_days, today))
    }
}

pub fn aggregate_daily_activity(
    records: &[TaskRecord],
    window_days: i64,
    today: NaiveDate,
) -> Vec<ActivitySample> {
    let start = today - Duration::days(window_days);
    let mut daily: BTreeMap<NaiveDate, u32> = BTreeMap::new();

    for record in records {
        let Some(last_activity) = record.last_activity else {
            continue;
        };
        let items = record.checklist_len();
        if items == 0 {
            continue;
        }
        let day = last_activity.date_naive();
        if day < start || day > today {
            continue;
        }
        let entry = daily.entry(day).or_insert(0);
        *entry = entry.saturating_add(u32::try_from(items).unwrap_or(u32::MAX));
    }

    daily
        .into_iter()
        .map(|(date, count)| ActivitySample { date, count })
        .collect()
}

/// Deterministic stand-in series: two sine cycles over 60 days plus seeded noise.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticSource;

impl SyntheticSource {
    pub fn series(&self, today: NaiveDate) -> Vec<ActivitySample> {
        let mut rng = StdRng::seed_from_u64(SYNTHETIC_SEED);
        let noise = Normal::new(0.0_f64, 2.0).expect("constant normal parameters are valid");
        let last = (SYNTHETIC_DAYS - 1) as f64;

        (0..SYNTHETIC_DAYS)
            .map(|index| {
                let phase = 4.0 * std::f64::consts::PI * index as f64 / last;
                let value = 10.0 * phase.sin() + noise.sample(&mut rng) + 15.0;
                let offset = (SYNTHETIC_DAYS - 1 - index) as i64;
                ActivitySample {
                    date: today - Duration::days(offset),
                    count: value.max(0.0).round() as u32,
                }
            })
            .collect()
    }
}

impl ActivitySource for SyntheticSource {
    fn daily_activity(&self, _window_days: i64, today: NaiveDate) -> AppResult<Vec<ActivitySample>> {
        Ok(self.series(today))
    }
}

pub struct ActivityIngestor<S> {
    primary: S,
    fallback: SyntheticSource,
}

impl<S: ActivitySource> ActivityIngestor<S> {
    pub fn new(primary: S) -> Self {
        Self {
            primary,
            fallback: SyntheticSource,
        }
    }

    pub fn fetch(&self, window_days: i64) -> Outcome<Vec<ActivitySample>> {
        self.fetch_on(window_days, Utc::now().date_naive())
    }

    pub fn fetch_on(&self, window_days: i64, today: NaiveDate) -> Outcome<Vec<ActivitySample>> {
        let reason = match self.primary.daily_activity(window_days, today) {
            Ok(samples) if samples.len() >= MIN_ACTIVITY_SAMPLES => return Outcome::Ok(samples),
            Ok(samples) => {
                tracing::warn!(
                    samples = samples.len(),
                    required = MIN_ACTIVITY_SAMPLES,
                    "insufficient tracker activity, using synthetic series"
                );
                FallbackReason::InsufficientSamples(samples.len())
            }
            Err(AppError::DataUnavailable(detail)) => {
                tracing::warn!(error = %detail, "tracker unavailable, using synthetic series");
                FallbackReason::SourceUnavailable(detail)
            }
            Err(error) => {
                tracing::error!(error = %error, "activity ingestion failed, using synthetic series");
                FallbackReason::SourceUnavailable(error.to_string())
            }
        };
        Outcome::Fallback(self.fallback.series(today), reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChecklistItem;
    use chrono::{TimeZone, Utc};

    struct StaticSource(AppResult<Vec<ActivitySample>>);

    impl ActivitySource for StaticSource {
        fn daily_activity(&self, _window_days: i64, _today: NaiveDate) -> AppResult<Vec<ActivitySample>> {
            match &self.0 {
                Ok(samples) => Ok(samples.clone()),
                Err(error) => Err(AppError::DataUnavailable(error.to_string())),
            }
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 31).expect("date")
    }

    fn record(id: &str, days_ago: i64, items: usize) -> TaskRecord {
        let when = Utc
            .with_ymd_and_hms(2026, 3, 31, 10, 0, 0)
            .single()
            .expect("timestamp")
            - Duration::days(days_ago);
        TaskRecord {
            id: id.to_string(),
            title: id.to_string(),
            checklist: Some(vec![ChecklistItem { complete: false }; items]),
            last_activity: Some(when),
            ..TaskRecord::default()
        }
    }

    #[test]
    fn aggregates_by_day_inside_window() {
        let mut no_activity = record("d", 0, 3);
        no_activity.last_activity = None;
        let records = vec![
            record("a", 1, 2),
            record("b", 1, 3),
            record("c", 5, 1),
            record("old", 90, 4),
            record("empty", 2, 0),
            no_activity,
        ];

        let samples = aggregate_daily_activity(&records, 60, today());
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].date, today() - Duration::days(5));
        assert_eq!(samples[0].count, 1);
        assert_eq!(samples[1].count, 5);
    }

    #[test]
    fn short_history_falls_back_to_reproducible_series() {
        let short = (0..3)
            .map(|offset| ActivitySample {
                date: today() - Duration::days(offset),
                count: 4,
            })
            .collect();
        let ingestor = ActivityIngestor::new(StaticSource(Ok(short)));

        let first = ingestor.fetch_on(60, today());
        let second = ingestor.fetch_on(60, today());
        assert_eq!(first.reason(), Some(&FallbackReason::InsufficientSamples(3)));
        assert_eq!(first.data().len(), SYNTHETIC_DAYS);
        assert_eq!(
            serde_json::to_string(first.data()).expect("json"),
            serde_json::to_string(second.data()).expect("json")
        );
        assert_eq!(first.data().last().map(|sample| sample.date), Some(today()));
        assert!(first.data().windows(2).all(|pair| pair[0].date < pair[1].date));
    }

    #[test]
    fn unreachable_source_is_reported_as_fallback_reason() {
        let ingestor = ActivityIngestor::new(StaticSource(Err(AppError::DataUnavailable(
            "connection refused".to_string(),
        ))));
        let outcome = ingestor.fetch_on(60, today());
        assert!(matches!(outcome.reason(), Some(FallbackReason::SourceUnavailable(_))));
        assert_eq!(outcome.data().len(), SYNTHETIC_DAYS);
    }

    #[test]
    fn enough_real_samples_are_passed_through() {
        let samples: Vec<ActivitySample> = (0..10)
            .rev()
            .map(|offset| ActivitySample {
                date: today() - Duration::days(offset),
                count: 5,
            })
            .collect();
        let ingestor = ActivityIngestor::new(StaticSource(Ok(samples.clone())));
        assert_eq!(ingestor.fetch_on(60, today()), Outcome::Ok(samples));
    }
}
