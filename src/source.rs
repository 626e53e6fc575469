// src/source.rs
// Source definitions as read from the management layer (or config/sources.toml).
// The engine only reads these; runtime health lives in `stats`.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Web,
    Youtube,
    Social,
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Web
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Direct,
    Thread,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Direct
    }
}

/// Per-source inclusion/exclusion rules. All lists default to empty
/// (empty rule set accepts everything).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub include_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub regex_include: Vec<String>,
    #[serde(default)]
    pub regex_exclude: Vec<String>,
    #[serde(default)]
    pub domain_allow: Vec<String>,
    #[serde(default)]
    pub domain_deny: Vec<String>,
    /// Expected language ("fr" / "en"); unset = no constraint.
    #[serde(default)]
    pub language: Option<String>,
}

impl FilterRules {
    pub fn is_empty(&self) -> bool {
        self.include_keywords.is_empty()
            && self.exclude_keywords.is_empty()
            && self.regex_include.is_empty()
            && self.regex_exclude.is_empty()
            && self.domain_allow.is_empty()
            && self.domain_deny.is_empty()
            && self.language.is_none()
    }
}

/// Local-time window during which nothing is dispatched. Items hitting the
/// window stay un-fingerprinted, so a later run delivers them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    /// "HH:MM"
    pub start: String,
    /// "HH:MM"
    pub end: String,
}

impl QuietHours {
    /// True when `now` falls inside the window. Ranges may cross midnight.
    /// Unparseable bounds disable the window rather than blocking delivery.
    pub fn contains(&self, now: NaiveTime) -> bool {
        let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(&self.start, "%H:%M"),
            NaiveTime::parse_from_str(&self.end, "%H:%M"),
        ) else {
            return false;
        };
        if start < end {
            start <= now && now <= end
        } else {
            now >= start || now <= end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub id: String,
    pub name: Option<String>,
    pub category: String,
    /// Raw descriptor URL; resolved per `kind` before any network call.
    pub url: String,
    pub kind: SourceKind,
    /// Discord channel (direct mode) or channel hosting threads (thread mode).
    pub target: String,
    pub mode: DeliveryMode,
    pub interval_secs: u64,
    pub dedup_window_hours: u64,
    pub max_per_run: usize,
    pub active: bool,
    pub filters: FilterRules,
    /// Placeholders: {title}, {link}. Default "{title}\n{link}".
    pub message_template: Option<String>,
    pub mention_user: Option<String>,
    pub mention_role: Option<String>,
    pub allow_embeds: bool,
    pub quiet_hours: Option<QuietHours>,
    pub daily_cap: Option<u64>,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            category: "general".to_string(),
            url: String::new(),
            kind: SourceKind::Web,
            target: String::new(),
            mode: DeliveryMode::Direct,
            interval_secs: 300,
            dedup_window_hours: 24,
            max_per_run: 5,
            active: true,
            filters: FilterRules::default(),
            message_template: None,
            mention_user: None,
            mention_role: None,
            allow_embeds: false,
            quiet_hours: None,
            daily_cap: None,
        }
    }
}

impl Source {
    pub fn dedup_window_secs(&self) -> i64 {
        (self.dedup_window_hours as i64).saturating_mul(3600)
    }
}
