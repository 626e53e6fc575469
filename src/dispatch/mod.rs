// src/dispatch/mod.rs
pub mod discord;

use async_trait::async_trait;

use crate::fetch::NormalizedItem;
use crate::outcome::RunErrorKind;
use crate::source::Source;

/// Classified delivery result. This is the whole failure surface of the
/// dispatch client: it never raises past its boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Retries exhausted on a retryable class (rate limit, 5xx, transport).
    Transient(String),
    /// Not retryable (bad target, revoked credential); needs operator action.
    Permanent(String),
}

impl DeliveryOutcome {
    pub fn error_kind(&self) -> Option<RunErrorKind> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Transient(_) => Some(RunErrorKind::TransientDispatch),
            DeliveryOutcome::Permanent(_) => Some(RunErrorKind::PermanentDispatch),
        }
    }
}

#[async_trait]
pub trait Deliver: Send + Sync {
    async fn send(&self, item: &NormalizedItem, source: &Source) -> DeliveryOutcome;
}

/// Render the message for one item: template placeholders, then mention
/// prefixes. Pure.
pub fn render_message(item: &NormalizedItem, source: &Source) -> String {
    let template = source.message_template.as_deref().unwrap_or("{title}\n{link}");
    let mut message = template
        .replace("{title}", &item.title)
        .replace("{link}", &item.link);

    if let Some(user) = &source.mention_user {
        message = format!("<@{user}> {message}");
    }
    if let Some(role) = &source.mention_role {
        message = format!("<@&{role}> {message}");
    }
    message
}
