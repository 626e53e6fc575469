// tests/pipeline_run.rs
// Pipeline behavior with mock fetch/deliver seams: dedup across runs,
// per-run caps, failure classes, quiet hours, daily caps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use flux_dispatch::fetch::FetchError;
use flux_dispatch::outcome::RunErrorKind;
use flux_dispatch::pipeline::{run_once, PollContext};
use flux_dispatch::source::QuietHours;
use flux_dispatch::{
    Deliver, DeliveryOutcome, DiagnosticsHub, FetchFeed, FingerprintStore, NormalizedItem, Source,
};

struct StaticFetcher {
    items: Vec<NormalizedItem>,
}

#[async_trait]
impl FetchFeed for StaticFetcher {
    async fn fetch(&self, _source: &Source) -> Result<Vec<NormalizedItem>, FetchError> {
        Ok(self.items.clone())
    }
}

struct FailingFetcher {
    error: FetchError,
}

#[async_trait]
impl FetchFeed for FailingFetcher {
    async fn fetch(&self, _source: &Source) -> Result<Vec<NormalizedItem>, FetchError> {
        Err(self.error.clone())
    }
}

/// Records every delivered link; optionally fails every attempt.
struct RecordingDeliver {
    fail_with: Option<DeliveryOutcome>,
    sent: Mutex<Vec<String>>,
    attempts: AtomicUsize,
}

impl RecordingDeliver {
    fn ok() -> Self {
        Self {
            fail_with: None,
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    fn failing(outcome: DeliveryOutcome) -> Self {
        Self {
            fail_with: Some(outcome),
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Deliver for RecordingDeliver {
    async fn send(&self, item: &NormalizedItem, _source: &Source) -> DeliveryOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(outcome) => outcome.clone(),
            None => {
                self.sent.lock().unwrap().push(item.link.clone());
                DeliveryOutcome::Delivered
            }
        }
    }
}

fn items(n: usize) -> Vec<NormalizedItem> {
    (0..n)
        .map(|i| NormalizedItem {
            source_id: "s1".into(),
            link: format!("https://feed.example/item-{i}"),
            title: format!("Item {i}"),
            // Descending so item-0 is newest.
            published_at: Some(1_700_000_000 - i as i64),
            summary: String::new(),
        })
        .collect()
}

fn ctx(fetcher: Arc<dyn FetchFeed>, sender: Arc<dyn Deliver>) -> PollContext {
    PollContext {
        fetcher,
        sender,
        store: Arc::new(FingerprintStore::in_memory()),
        diagnostics: Arc::new(DiagnosticsHub::new()),
    }
}

#[tokio::test]
async fn sixty_items_deliver_across_two_runs() {
    let source = Source {
        id: "s1".into(),
        url: "https://feed.example/rss".into(),
        target: "1".into(),
        interval_secs: 3_600,
        dedup_window_hours: 24,
        max_per_run: 50,
        ..Source::default()
    };
    let deliver = Arc::new(RecordingDeliver::ok());
    let ctx = ctx(Arc::new(StaticFetcher { items: items(60) }), deliver.clone());

    // First run: the 50 newest go out, 10 wait without being fingerprinted.
    let first = run_once(&ctx, &source).await;
    assert_eq!(first.fetched, 60);
    assert_eq!(first.filtered_in, 60);
    assert_eq!(first.dispatched, 50);
    assert_eq!(first.deduped_out, 0);
    assert!(first.error_kind.is_none());
    assert_eq!(ctx.store.len(), 50);

    // Second run, feed unchanged: the remaining 10 go out, the rest dedup.
    let second = run_once(&ctx, &source).await;
    assert_eq!(second.dispatched, 10);
    assert_eq!(second.deduped_out, 50);
    assert_eq!(ctx.store.len(), 60);

    // Third run: everything is suppressed.
    let third = run_once(&ctx, &source).await;
    assert_eq!(third.dispatched, 0);
    assert_eq!(third.deduped_out, 60);

    let sent = deliver.sent.lock().unwrap();
    assert_eq!(sent.len(), 60);
    // No link delivered twice.
    let unique: std::collections::HashSet<_> = sent.iter().collect();
    assert_eq!(unique.len(), 60);
}

#[tokio::test]
async fn transient_failure_leaves_item_eligible_for_next_run() {
    let source = Source {
        id: "s1".into(),
        target: "1".into(),
        ..Source::default()
    };
    let store = Arc::new(FingerprintStore::in_memory());
    let diagnostics = Arc::new(DiagnosticsHub::new());
    let fetcher: Arc<dyn FetchFeed> = Arc::new(StaticFetcher { items: items(3) });

    let failing = PollContext {
        fetcher: fetcher.clone(),
        sender: Arc::new(RecordingDeliver::failing(DeliveryOutcome::Transient(
            "HTTP 429".into(),
        ))),
        store: store.clone(),
        diagnostics: diagnostics.clone(),
    };
    let outcome = run_once(&failing, &source).await;
    assert_eq!(outcome.dispatched, 0);
    assert_eq!(outcome.failed, 3);
    assert_eq!(outcome.error_kind, Some(RunErrorKind::TransientDispatch));
    // Nothing fingerprinted: the items must be retried.
    assert_eq!(store.len(), 0);

    // Next scheduled run with a healthy sender delivers everything.
    let healthy = PollContext {
        fetcher,
        sender: Arc::new(RecordingDeliver::ok()),
        store: store.clone(),
        diagnostics,
    };
    let retry = run_once(&healthy, &source).await;
    assert_eq!(retry.dispatched, 3);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn permanent_failure_is_classified_and_not_fingerprinted() {
    let source = Source {
        id: "s1".into(),
        target: "bad-channel".into(),
        ..Source::default()
    };
    let ctx = ctx(
        Arc::new(StaticFetcher { items: items(1) }),
        Arc::new(RecordingDeliver::failing(DeliveryOutcome::Permanent(
            "HTTP 404".into(),
        ))),
    );
    let outcome = run_once(&ctx, &source).await;
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.error_kind, Some(RunErrorKind::PermanentDispatch));
    assert_eq!(ctx.store.len(), 0);
}

#[tokio::test]
async fn fetch_errors_abort_the_run_without_side_effects() {
    for (error, expected) in [
        (
            FetchError::Timeout("GET timed out".into()),
            RunErrorKind::Timeout,
        ),
        (
            FetchError::Parse("not a feed".into()),
            RunErrorKind::Parse,
        ),
        (
            FetchError::Resolution("bad descriptor".into()),
            RunErrorKind::Resolution,
        ),
        (FetchError::Http("HTTP 502".into()), RunErrorKind::Fetch),
    ] {
        let deliver = Arc::new(RecordingDeliver::ok());
        let ctx = ctx(Arc::new(FailingFetcher { error }), deliver.clone());
        let outcome = run_once(&ctx, &Source::default()).await;
        assert_eq!(outcome.error_kind, Some(expected));
        assert_eq!(outcome.fetched, 0);
        assert_eq!(outcome.dispatched, 0);
        assert_eq!(ctx.store.len(), 0);
        assert_eq!(deliver.attempts.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn quiet_hours_defer_without_fingerprinting() {
    let source = Source {
        id: "s1".into(),
        target: "1".into(),
        // Window covering the whole day: always quiet.
        quiet_hours: Some(QuietHours {
            start: "00:00".into(),
            end: "23:59".into(),
        }),
        ..Source::default()
    };
    let deliver = Arc::new(RecordingDeliver::ok());
    let ctx = ctx(Arc::new(StaticFetcher { items: items(4) }), deliver.clone());

    let outcome = run_once(&ctx, &source).await;
    assert_eq!(outcome.filtered_in, 4);
    assert_eq!(outcome.dispatched, 0);
    assert!(outcome.error_kind.is_none());
    // Deferred, not dropped: no fingerprints, so a later run delivers.
    assert_eq!(ctx.store.len(), 0);
    assert_eq!(deliver.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn daily_cap_stops_dispatch_until_tomorrow() {
    let source = Source {
        id: "s1".into(),
        target: "1".into(),
        max_per_run: 10,
        daily_cap: Some(2),
        ..Source::default()
    };
    let deliver = Arc::new(RecordingDeliver::ok());
    let ctx = ctx(Arc::new(StaticFetcher { items: items(5) }), deliver.clone());

    let first = run_once(&ctx, &source).await;
    assert_eq!(first.dispatched, 2);
    // The scheduler feeds outcomes to diagnostics; do the same here so the
    // next run sees today's tally.
    ctx.diagnostics.record(&first);

    let second = run_once(&ctx, &source).await;
    assert_eq!(second.dispatched, 0);
    assert_eq!(deliver.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn filter_rules_apply_before_dedup_and_dispatch() {
    let mut source = Source {
        id: "s1".into(),
        target: "1".into(),
        ..Source::default()
    };
    source.filters.include_keywords = vec!["Item 1".into(), "Item 2".into()];

    let deliver = Arc::new(RecordingDeliver::ok());
    let ctx = ctx(Arc::new(StaticFetcher { items: items(5) }), deliver.clone());

    let outcome = run_once(&ctx, &source).await;
    assert_eq!(outcome.fetched, 5);
    assert_eq!(outcome.filtered_in, 2);
    assert_eq!(outcome.dispatched, 2);
    assert_eq!(ctx.store.len(), 2);
}

#[tokio::test]
async fn newest_items_win_the_per_run_cap() {
    let source = Source {
        id: "s1".into(),
        target: "1".into(),
        max_per_run: 2,
        ..Source::default()
    };
    // Feed order is oldest-first on purpose; the pipeline must not trust it.
    let mut shuffled = items(4);
    shuffled.reverse();

    let deliver = Arc::new(RecordingDeliver::ok());
    let ctx = ctx(Arc::new(StaticFetcher { items: shuffled }), deliver.clone());
    let outcome = run_once(&ctx, &source).await;

    assert_eq!(outcome.dispatched, 2);
    let sent = deliver.sent.lock().unwrap();
    assert_eq!(
        *sent,
        vec![
            "https://feed.example/item-0".to_string(),
            "https://feed.example/item-1".to_string(),
        ]
    );
}
