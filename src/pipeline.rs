// src/pipeline.rs
// One poll run for one source: fetch, filter, dedup, dispatch, account.
// Fingerprints are recorded only after confirmed delivery, so an abandoned
// run never suppresses an undelivered item.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::dispatch::{Deliver, DeliveryOutcome};
use crate::fetch::FetchFeed;
use crate::filter::{CompiledRules, Verdict};
use crate::fingerprint::{fingerprint_key, FingerprintStore};
use crate::outcome::{RunErrorKind, RunOutcome};
use crate::source::Source;
use crate::stats::DiagnosticsHub;

/// Everything one run needs. Cloned per worker; all fields are shared
/// handles.
#[derive(Clone)]
pub struct PollContext {
    pub fetcher: Arc<dyn FetchFeed>,
    pub sender: Arc<dyn Deliver>,
    pub store: Arc<FingerprintStore>,
    pub diagnostics: Arc<DiagnosticsHub>,
}

pub async fn run_once(ctx: &PollContext, source: &Source) -> RunOutcome {
    let mut outcome = RunOutcome::new(&source.id, &source.category);

    let mut items = match ctx.fetcher.fetch(source).await {
        Ok(items) => items,
        Err(e) => {
            // Run-scoped failure: no fingerprint or dispatch activity.
            outcome.note_error(e.kind(), e.to_string());
            return outcome;
        }
    };
    outcome.fetched = items.len();
    if items.is_empty() {
        debug!(target: "pipeline", source = %source.id, "feed empty");
        return outcome;
    }

    // Feed ordering is not trustworthy; take newest first before capping.
    items.sort_by_key(|it| std::cmp::Reverse(it.published_at.unwrap_or(0)));

    let rules = CompiledRules::compile(&source.filters, &source.id);
    let now = Utc::now();
    let now_unix = now.timestamp();
    let today = now.date_naive();
    let in_quiet_hours = source
        .quiet_hours
        .as_ref()
        .map_or(false, |qh| qh.contains(now.time()));
    let already_sent_today = ctx.diagnostics.dispatched_today(&source.id, today);
    let mut seen_this_run: HashSet<String> = HashSet::new();

    for item in &items {
        if outcome.dispatched >= source.max_per_run {
            // Remaining items stay un-fingerprinted for the next run.
            break;
        }

        match rules.evaluate(item) {
            Verdict::Accept => {}
            Verdict::Reject => continue,
            Verdict::PoisonedPattern => {
                outcome.note_error(
                    RunErrorKind::FilterEval,
                    format!("invalid filter pattern excluded {}", item.link),
                );
                continue;
            }
        }
        outcome.filtered_in += 1;

        let key = fingerprint_key(&source.id, item);
        if !seen_this_run.insert(key.clone()) || ctx.store.seen(&key, now_unix) {
            outcome.deduped_out += 1;
            continue;
        }

        // Deferred, not dropped: no fingerprint means a later run delivers.
        if in_quiet_hours {
            continue;
        }
        if let Some(cap) = source.daily_cap {
            if already_sent_today + outcome.dispatched as u64 >= cap {
                debug!(target: "pipeline", source = %source.id, cap, "daily cap reached");
                break;
            }
        }

        match ctx.sender.send(item, source).await {
            DeliveryOutcome::Delivered => {
                let expires_at = now_unix + source.dedup_window_secs();
                if !ctx.store.record(&key, &source.id, now_unix, expires_at) {
                    // Lost an insert race; the other writer's entry stands.
                    debug!(target: "pipeline", source = %source.id, key = %key, "fingerprint already recorded");
                }
                outcome.dispatched += 1;
                outcome.last_link = Some(item.link.clone());
            }
            // Item-scoped failures skip the one item and keep the run
            // going. No fingerprint, so the item is retried next run.
            DeliveryOutcome::Transient(detail) => {
                outcome.failed += 1;
                outcome.note_error(RunErrorKind::TransientDispatch, detail);
            }
            DeliveryOutcome::Permanent(detail) => {
                outcome.failed += 1;
                outcome.note_error(RunErrorKind::PermanentDispatch, detail);
            }
        }
    }

    if let Err(e) = ctx.store.flush().await {
        warn!(target: "pipeline", source = %source.id, error = %e, "fingerprint flush failed");
    }

    outcome
}
