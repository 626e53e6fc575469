// src/stats.rs
// Additive bookkeeping over run outcomes. Shared by workers; every
// operation is lock-scoped and infallible so it can never stall a run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::Serialize;

use crate::outcome::{RunErrorKind, RunOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub category: String,
    pub last_checked: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<RunErrorKind>,
    pub consecutive_errors: u32,
    pub total_dispatched: u64,
    pub dispatched_today: u64,
    day: NaiveDate,
    pub last_link: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Counters {
    pub runs: u64,
    pub errored_runs: u64,
    pub dispatched: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub global: Counters,
    pub categories: HashMap<String, Counters>,
    pub sources: Vec<SourceHealth>,
}

#[derive(Default)]
struct GlobalCounters {
    runs: AtomicU64,
    errored_runs: AtomicU64,
    dispatched: AtomicU64,
}

#[derive(Default)]
pub struct DiagnosticsHub {
    sources: Mutex<HashMap<String, SourceHealth>>,
    categories: Mutex<HashMap<String, Counters>>,
    global: GlobalCounters,
}

impl DiagnosticsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one run outcome. Consecutive errors reset as soon as a run
    /// delivered anything.
    pub fn record(&self, outcome: &RunOutcome) {
        self.global.runs.fetch_add(1, Ordering::Relaxed);
        if outcome.error_kind.is_some() {
            self.global.errored_runs.fetch_add(1, Ordering::Relaxed);
        }
        self.global
            .dispatched
            .fetch_add(outcome.dispatched as u64, Ordering::Relaxed);

        {
            let mut categories = self.categories.lock().expect("category lock poisoned");
            let c = categories.entry(outcome.category.clone()).or_default();
            c.runs += 1;
            if outcome.error_kind.is_some() {
                c.errored_runs += 1;
            }
            c.dispatched += outcome.dispatched as u64;
        }

        {
            let mut sources = self.sources.lock().expect("source lock poisoned");
            let today = outcome.ran_at.date_naive();
            let health = sources
                .entry(outcome.source_id.clone())
                .or_insert_with(|| SourceHealth {
                    source_id: outcome.source_id.clone(),
                    category: outcome.category.clone(),
                    last_checked: outcome.ran_at,
                    last_error: None,
                    last_error_kind: None,
                    consecutive_errors: 0,
                    total_dispatched: 0,
                    dispatched_today: 0,
                    day: today,
                    last_link: None,
                });
            health.category = outcome.category.clone();
            health.last_checked = outcome.ran_at;
            if health.day != today {
                health.day = today;
                health.dispatched_today = 0;
            }
            health.total_dispatched += outcome.dispatched as u64;
            health.dispatched_today += outcome.dispatched as u64;
            if let Some(link) = &outcome.last_link {
                health.last_link = Some(link.clone());
            }
            if outcome.dispatched > 0 {
                health.consecutive_errors = 0;
            }
            if let Some(kind) = outcome.error_kind {
                health.consecutive_errors += 1;
                health.last_error_kind = Some(kind);
                health.last_error = outcome.error.clone();
            }
        }

        counter!("flux_runs_total").increment(1);
        if outcome.error_kind.is_some() {
            counter!("flux_run_errors_total").increment(1);
        }
        counter!("flux_items_dispatched_total").increment(outcome.dispatched as u64);
        counter!("flux_items_deduped_total").increment(outcome.deduped_out as u64);
        counter!("flux_items_dropped_total")
            .increment(outcome.fetched.saturating_sub(outcome.filtered_in) as u64);
    }

    /// Deliveries counted for `source_id` on `today` (UTC). Used for the
    /// daily cap; a day rollover reads as zero.
    pub fn dispatched_today(&self, source_id: &str, today: NaiveDate) -> u64 {
        let sources = self.sources.lock().expect("source lock poisoned");
        sources
            .get(source_id)
            .filter(|h| h.day == today)
            .map_or(0, |h| h.dispatched_today)
    }

    pub fn source_health(&self, source_id: &str) -> Option<SourceHealth> {
        let sources = self.sources.lock().expect("source lock poisoned");
        sources.get(source_id).cloned()
    }

    /// Owned snapshot for monitoring. `category` narrows both the counters
    /// and the per-source list.
    pub fn snapshot(&self, category: Option<&str>) -> StatsSnapshot {
        let categories = {
            let map = self.categories.lock().expect("category lock poisoned");
            match category {
                Some(c) => map
                    .iter()
                    .filter(|(k, _)| k.as_str() == c)
                    .map(|(k, v)| (k.clone(), *v))
                    .collect(),
                None => map.clone(),
            }
        };
        let sources = {
            let map = self.sources.lock().expect("source lock poisoned");
            let mut list: Vec<SourceHealth> = map
                .values()
                .filter(|h| category.map_or(true, |c| h.category == c))
                .cloned()
                .collect();
            list.sort_by(|a, b| a.source_id.cmp(&b.source_id));
            list
        };
        StatsSnapshot {
            global: Counters {
                runs: self.global.runs.load(Ordering::Relaxed),
                errored_runs: self.global.errored_runs.load(Ordering::Relaxed),
                dispatched: self.global.dispatched.load(Ordering::Relaxed),
            },
            categories,
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::RunOutcome;

    fn outcome(source: &str, category: &str, dispatched: usize) -> RunOutcome {
        let mut o = RunOutcome::new(source, category);
        o.dispatched = dispatched;
        o
    }

    #[test]
    fn consecutive_errors_reset_on_delivery() {
        let hub = DiagnosticsHub::new();

        let mut failed = outcome("s1", "news", 0);
        failed.note_error(RunErrorKind::Fetch, "boom");
        hub.record(&failed);
        hub.record(&failed);
        assert_eq!(hub.source_health("s1").unwrap().consecutive_errors, 2);

        hub.record(&outcome("s1", "news", 3));
        let health = hub.source_health("s1").unwrap();
        assert_eq!(health.consecutive_errors, 0);
        // Error text stays visible for operators until overwritten.
        assert!(health.last_error.is_some());
        assert_eq!(health.total_dispatched, 3);
    }

    #[test]
    fn category_snapshot_narrows() {
        let hub = DiagnosticsHub::new();
        hub.record(&outcome("s1", "news", 2));
        hub.record(&outcome("s2", "videos", 1));

        let all = hub.snapshot(None);
        assert_eq!(all.global.runs, 2);
        assert_eq!(all.global.dispatched, 3);
        assert_eq!(all.sources.len(), 2);

        let news = hub.snapshot(Some("news"));
        assert_eq!(news.categories.len(), 1);
        assert_eq!(news.categories["news"].dispatched, 2);
        assert_eq!(news.sources.len(), 1);
        assert_eq!(news.sources[0].source_id, "s1");
    }

    #[test]
    fn daily_counter_rolls_over() {
        let hub = DiagnosticsHub::new();
        let mut o = outcome("s1", "news", 4);
        hub.record(&o);
        let today = o.ran_at.date_naive();
        assert_eq!(hub.dispatched_today("s1", today), 4);

        // Next day: counter reads zero before any run.
        let tomorrow = today.succ_opt().unwrap();
        assert_eq!(hub.dispatched_today("s1", tomorrow), 0);

        // A run stamped tomorrow resets then accumulates.
        o.ran_at = o.ran_at + chrono::Duration::days(1);
        o.dispatched = 2;
        hub.record(&o);
        assert_eq!(hub.dispatched_today("s1", tomorrow), 2);
    }
}
