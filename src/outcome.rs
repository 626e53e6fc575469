// src/outcome.rs
// One RunOutcome per poll run; consumed by the diagnostics hub.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Classified failure taxonomy. Run-scoped kinds abort the run's remaining
/// steps; dispatch/filter kinds are item-scoped and only mark the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunErrorKind {
    Resolution,
    Fetch,
    Timeout,
    Parse,
    FilterEval,
    TransientDispatch,
    PermanentDispatch,
}

impl RunErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunErrorKind::Resolution => "resolution-error",
            RunErrorKind::Fetch => "fetch-error",
            RunErrorKind::Timeout => "timeout",
            RunErrorKind::Parse => "parse-error",
            RunErrorKind::FilterEval => "filter-evaluation-error",
            RunErrorKind::TransientDispatch => "transient-dispatch-failure",
            RunErrorKind::PermanentDispatch => "permanent-dispatch-failure",
        }
    }

    /// Ranking used to pick the dominant classification for a run:
    /// run-scoped errors > dispatch failures > item-scoped filter noise.
    fn severity(&self) -> u8 {
        match self {
            RunErrorKind::Resolution
            | RunErrorKind::Fetch
            | RunErrorKind::Timeout
            | RunErrorKind::Parse => 3,
            RunErrorKind::TransientDispatch | RunErrorKind::PermanentDispatch => 2,
            RunErrorKind::FilterEval => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub source_id: String,
    pub category: String,
    pub ran_at: DateTime<Utc>,
    pub fetched: usize,
    pub filtered_in: usize,
    pub deduped_out: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub error_kind: Option<RunErrorKind>,
    pub error: Option<String>,
    /// Link of the last successfully dispatched item, for the source record.
    pub last_link: Option<String>,
}

impl RunOutcome {
    pub fn new(source_id: &str, category: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            category: category.to_string(),
            ran_at: Utc::now(),
            fetched: 0,
            filtered_in: 0,
            deduped_out: 0,
            dispatched: 0,
            failed: 0,
            error_kind: None,
            error: None,
            last_link: None,
        }
    }

    /// Record an error, keeping the most severe classification seen so far.
    pub fn note_error(&mut self, kind: RunErrorKind, text: impl Into<String>) {
        let keep_existing = self
            .error_kind
            .is_some_and(|k| k.severity() >= kind.severity());
        if !keep_existing {
            self.error_kind = Some(kind);
            self.error = Some(text.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominant_error_prefers_run_scoped() {
        let mut out = RunOutcome::new("s1", "general");
        out.note_error(RunErrorKind::FilterEval, "bad pattern");
        out.note_error(RunErrorKind::TransientDispatch, "429");
        assert_eq!(out.error_kind, Some(RunErrorKind::TransientDispatch));

        out.note_error(RunErrorKind::Timeout, "fetch timed out");
        assert_eq!(out.error_kind, Some(RunErrorKind::Timeout));

        // A later lower-severity error does not demote the classification.
        out.note_error(RunErrorKind::FilterEval, "bad pattern");
        assert_eq!(out.error_kind, Some(RunErrorKind::Timeout));
    }
}
