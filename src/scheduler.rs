// src/scheduler.rs
// Owns all scheduling state. A single task holds the entry table; everyone
// else talks to it through a cloneable handle. Workers run on a JoinSet
// bounded by a semaphore; the Idle -> Running transition on an entry is the
// at-most-one-run-per-source guarantee.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::gauge;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::outcome::{RunErrorKind, RunOutcome};
use crate::pipeline::{self, PollContext};
use crate::source::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Disabled,
}

struct ScheduleEntry {
    source: Source,
    state: RunState,
    next_run: Instant,
}

impl ScheduleEntry {
    /// Compare-and-set Idle -> Running. A source that is already Running
    /// (or Disabled) is skipped, which is what prevents overlapping polls
    /// of a slow source.
    fn try_begin_run(&mut self) -> bool {
        if self.state == RunState::Idle {
            self.state = RunState::Running;
            true
        } else {
            false
        }
    }
}

/// Interval actually used for the next run. The global aggressive override
/// replaces every configured interval wholesale; only configured intervals
/// are subject to the floor.
pub fn effective_interval(aggressive: bool, settings: &Settings, source: &Source) -> Duration {
    if aggressive {
        Duration::from_secs(settings.aggressive_interval_secs)
    } else {
        Duration::from_secs(settings.clamp_interval(source.interval_secs))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntrySnapshot {
    pub source_id: String,
    pub category: String,
    pub state: RunState,
    pub interval_secs: u64,
    pub next_run_in_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub aggressive_mode: bool,
    pub entries: Vec<ScheduleEntrySnapshot>,
}

enum Command {
    /// Upsert: create/update/activate/deactivate in one notification.
    Register(Source),
    Unregister(String),
    UpdateInterval { source_id: String, interval_secs: u64 },
    UpdateCategoryInterval { category: String, interval_secs: u64 },
    SetAggressive(bool),
    PollNow(String),
    Snapshot(oneshot::Sender<SchedulerSnapshot>),
    Shutdown,
}

/// Cloneable front door to the scheduler task. Sends are fire-and-forget;
/// a stopped scheduler turns them into no-ops.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn register(&self, source: Source) {
        let _ = self.tx.send(Command::Register(source));
    }

    pub fn unregister(&self, source_id: &str) {
        let _ = self.tx.send(Command::Unregister(source_id.to_string()));
    }

    pub fn update_interval(&self, source_id: &str, interval_secs: u64) {
        let _ = self.tx.send(Command::UpdateInterval {
            source_id: source_id.to_string(),
            interval_secs,
        });
    }

    /// Interval override for every source in a category.
    pub fn update_category_interval(&self, category: &str, interval_secs: u64) {
        let _ = self.tx.send(Command::UpdateCategoryInterval {
            category: category.to_string(),
            interval_secs,
        });
    }

    pub fn set_aggressive_mode(&self, enabled: bool) {
        let _ = self.tx.send(Command::SetAggressive(enabled));
    }

    /// Out-of-band run, subject to the same at-most-one-instance rule.
    pub fn poll_now(&self, source_id: &str) {
        let _ = self.tx.send(Command::PollNow(source_id.to_string()));
    }

    pub async fn snapshot(&self) -> Option<SchedulerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

pub struct Scheduler {
    entries: HashMap<String, ScheduleEntry>,
    ctx: PollContext,
    settings: Settings,
    aggressive: bool,
    rx: mpsc::UnboundedReceiver<Command>,
    semaphore: Arc<Semaphore>,
}

type TaskIds = HashMap<tokio::task::Id, String>;
type InFlight = JoinSet<(String, RunOutcome)>;

impl Scheduler {
    pub fn new(ctx: PollContext, settings: Settings) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_polls.max(1)));
        (
            Self {
                entries: HashMap::new(),
                ctx,
                settings,
                aggressive: false,
                rx,
                semaphore,
            },
            SchedulerHandle { tx },
        )
    }

    /// Timing loop. Blocks until `shutdown()` (or every handle dropped),
    /// then drains in-flight runs within the drain timeout.
    pub async fn run(mut self) {
        let tick = Duration::from_millis(self.settings.tick_interval_ms.max(10));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut inflight: InFlight = JoinSet::new();
        let mut task_ids: TaskIds = HashMap::new();
        let mut tick_count: u64 = 0;

        info!(
            pool = self.settings.max_concurrent_polls,
            tick_ms = self.settings.tick_interval_ms,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick_count += 1;
                    self.scan(&mut inflight, &mut task_ids);
                    if tick_count % self.settings.purge_every_ticks.max(1) == 0 {
                        let now = Utc::now().timestamp();
                        let removed = self.ctx.store.purge_expired(now);
                        if removed > 0 {
                            debug!(removed, "purged expired fingerprints");
                        }
                        if let Err(e) = self.ctx.store.flush().await {
                            warn!(error = %e, "fingerprint flush failed");
                        }
                    }
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => break,
                        Some(cmd) => self.apply(cmd),
                    }
                }
                Some(joined) = inflight.join_next_with_id(), if !inflight.is_empty() => {
                    self.finish(joined, &mut task_ids);
                }
            }
        }

        // Drain: no new runs are scheduled; in-flight runs may complete and
        // report normally until the timeout, then get aborted. Abandoning a
        // run is safe: fingerprints exist only for confirmed deliveries.
        info!(inflight = inflight.len(), "scheduler draining");
        let drain = Duration::from_secs(self.settings.drain_timeout_secs);
        let _ = tokio::time::timeout(drain, async {
            while let Some(joined) = inflight.join_next_with_id().await {
                self.finish(joined, &mut task_ids);
            }
        })
        .await;
        if !inflight.is_empty() {
            warn!(aborted = inflight.len(), "drain timeout, aborting runs");
            inflight.abort_all();
            while inflight.join_next().await.is_some() {}
        }
        if let Err(e) = self.ctx.store.flush().await {
            warn!(error = %e, "final fingerprint flush failed");
        }
        info!("scheduler stopped");
    }

    /// Launch every due, idle entry, bounded by the worker pool. When the
    /// pool is saturated, due entries simply wait for a later tick.
    fn scan(&mut self, inflight: &mut InFlight, task_ids: &mut TaskIds) {
        let now = Instant::now();
        for entry in self.entries.values_mut() {
            if entry.next_run > now || !entry.try_begin_run() {
                continue;
            }
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                // Pool exhausted; roll the transition back and stop scanning.
                entry.state = RunState::Idle;
                break;
            };
            let ctx = self.ctx.clone();
            let source = entry.source.clone();
            debug!(target: "scheduler", source = %source.id, "poll started");
            let handle = inflight.spawn(async move {
                let outcome = pipeline::run_once(&ctx, &source).await;
                drop(permit);
                (source.id, outcome)
            });
            task_ids.insert(handle.id(), entry.source.id.clone());
        }
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Register(source) => self.register(source),
            Command::Unregister(source_id) => {
                self.remove_or_disable(&source_id);
                gauge!("flux_sources_registered").set(self.entries.len() as f64);
            }
            Command::UpdateInterval {
                source_id,
                interval_secs,
            } => {
                let aggressive = self.aggressive;
                let settings = self.settings.clone();
                if let Some(entry) = self.entries.get_mut(&source_id) {
                    entry.source.interval_secs = interval_secs;
                    let next = Instant::now() + effective_interval(aggressive, &settings, &entry.source);
                    // Never push an already-due run further out.
                    entry.next_run = entry.next_run.min(next);
                }
            }
            Command::UpdateCategoryInterval {
                category,
                interval_secs,
            } => {
                let aggressive = self.aggressive;
                let settings = self.settings.clone();
                let now = Instant::now();
                for entry in self
                    .entries
                    .values_mut()
                    .filter(|e| e.source.category == category)
                {
                    entry.source.interval_secs = interval_secs;
                    let next = now + effective_interval(aggressive, &settings, &entry.source);
                    entry.next_run = entry.next_run.min(next);
                }
            }
            Command::SetAggressive(enabled) => {
                self.aggressive = enabled;
                gauge!("flux_aggressive_mode").set(if enabled { 1.0 } else { 0.0 });
                if enabled {
                    warn!("aggressive mode enabled, all sources at {}s", self.settings.aggressive_interval_secs);
                } else {
                    info!("aggressive mode disabled");
                }
                // Reschedule everything with the new effective interval.
                let now = Instant::now();
                let aggressive = self.aggressive;
                let settings = self.settings.clone();
                for entry in self.entries.values_mut() {
                    if entry.state == RunState::Idle {
                        entry.next_run = now + effective_interval(aggressive, &settings, &entry.source);
                    }
                }
            }
            Command::PollNow(source_id) => match self.entries.get_mut(&source_id) {
                Some(entry) if entry.state == RunState::Idle => {
                    // Due immediately; the next tick picks it up.
                    entry.next_run = Instant::now();
                    debug!(target: "scheduler", source = %source_id, "manual poll requested");
                }
                Some(_) => {
                    // At-most-one-instance applies to manual runs too.
                    debug!(target: "scheduler", source = %source_id, "manual poll skipped, run in flight");
                }
                None => {
                    warn!(target: "scheduler", source = %source_id, "manual poll for unknown source");
                }
            },
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the main loop.
            Command::Shutdown => {}
        }
    }

    fn register(&mut self, source: Source) {
        let id = source.id.clone();
        if !source.active {
            self.remove_or_disable(&id);
            gauge!("flux_sources_registered").set(self.entries.len() as f64);
            return;
        }
        let next_run = Instant::now() + effective_interval(self.aggressive, &self.settings, &source);
        match self.entries.get_mut(&id) {
            Some(entry) => {
                // Config update; an in-flight run finishes on the old config.
                entry.source = source;
                if entry.state == RunState::Disabled {
                    entry.state = RunState::Idle;
                }
                entry.next_run = entry.next_run.min(next_run);
            }
            None => {
                self.entries.insert(
                    id.clone(),
                    ScheduleEntry {
                        source,
                        state: RunState::Idle,
                        next_run,
                    },
                );
                info!(target: "scheduler", source = %id, "source registered");
            }
        }
        gauge!("flux_sources_registered").set(self.entries.len() as f64);
    }

    /// Deactivation never waits for an in-flight run: a Running entry is
    /// marked Disabled and reaped at completion, everything else goes now.
    fn remove_or_disable(&mut self, source_id: &str) {
        match self.entries.get_mut(source_id) {
            Some(entry) if entry.state == RunState::Running => {
                entry.state = RunState::Disabled;
                info!(target: "scheduler", source = %source_id, "source disabled, run in flight");
            }
            Some(_) => {
                self.entries.remove(source_id);
                info!(target: "scheduler", source = %source_id, "source removed");
            }
            None => {}
        }
    }

    fn finish(
        &mut self,
        joined: Result<(tokio::task::Id, (String, RunOutcome)), tokio::task::JoinError>,
        task_ids: &mut TaskIds,
    ) {
        let (source_id, outcome) = match joined {
            Ok((task_id, (source_id, outcome))) => {
                task_ids.remove(&task_id);
                (source_id, outcome)
            }
            Err(join_err) => {
                // A crashed worker must not take the loop or any other
                // source down with it.
                let source_id = task_ids.remove(&join_err.id()).unwrap_or_default();
                error!(target: "scheduler", source = %source_id, error = %join_err, "poll worker crashed");
                let category = self
                    .entries
                    .get(&source_id)
                    .map(|e| e.source.category.clone())
                    .unwrap_or_else(|| "general".to_string());
                let mut outcome = RunOutcome::new(&source_id, &category);
                outcome.note_error(RunErrorKind::Fetch, format!("poll worker crashed: {join_err}"));
                (source_id, outcome)
            }
        };

        self.ctx.diagnostics.record(&outcome);
        if outcome.error_kind.is_some() {
            debug!(
                target: "scheduler",
                source = %source_id,
                error = outcome.error.as_deref().unwrap_or("?"),
                "poll finished with error"
            );
        }

        match self.entries.get(&source_id).map(|e| e.state) {
            Some(RunState::Disabled) => {
                self.entries.remove(&source_id);
                gauge!("flux_sources_registered").set(self.entries.len() as f64);
            }
            Some(_) => {
                let aggressive = self.aggressive;
                let settings = self.settings.clone();
                if let Some(entry) = self.entries.get_mut(&source_id) {
                    entry.state = RunState::Idle;
                    entry.next_run =
                        Instant::now() + effective_interval(aggressive, &settings, &entry.source);
                }
            }
            // Unregistered while running; outcome already recorded.
            None => {}
        }
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        let now = Instant::now();
        let mut entries: Vec<ScheduleEntrySnapshot> = self
            .entries
            .values()
            .map(|e| ScheduleEntrySnapshot {
                source_id: e.source.id.clone(),
                category: e.source.category.clone(),
                state: e.state,
                interval_secs: e.source.interval_secs,
                next_run_in_secs: e.next_run.saturating_duration_since(now).as_secs(),
            })
            .collect();
        entries.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        SchedulerSnapshot {
            aggressive_mode: self.aggressive,
            entries,
        }
    }
}
