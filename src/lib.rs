// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod config;
pub mod dispatch;
pub mod fetch;
pub mod filter;
pub mod fingerprint;
pub mod metrics;
pub mod outcome;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod stats;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::Settings;
pub use crate::dispatch::{Deliver, DeliveryOutcome};
pub use crate::fetch::{FetchFeed, Fetcher, NormalizedItem};
pub use crate::fingerprint::FingerprintStore;
pub use crate::outcome::{RunErrorKind, RunOutcome};
pub use crate::pipeline::PollContext;
pub use crate::scheduler::{Scheduler, SchedulerHandle};
pub use crate::source::{DeliveryMode, Source, SourceKind};
pub use crate::stats::DiagnosticsHub;
