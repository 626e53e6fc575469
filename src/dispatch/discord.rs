// src/dispatch/discord.rs
// REST-only Discord delivery (send messages, never receive events).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{render_message, Deliver, DeliveryOutcome};
use crate::config::Settings;
use crate::fetch::NormalizedItem;
use crate::source::{DeliveryMode, Source};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const SUPPRESS_EMBEDS: u64 = 1 << 2;

#[derive(Serialize)]
struct MessagePayload {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u64>,
}

#[derive(Serialize)]
struct ThreadPayload {
    name: String,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

enum AttemptError {
    Transient(String),
    Permanent(String),
}

#[derive(Clone)]
pub struct DiscordSender {
    client: Client,
    token: String,
    api_base: String,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordSender {
    pub fn new(token: String, settings: &Settings) -> Self {
        Self {
            client: Client::new(),
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(settings.dispatch_timeout_secs),
            max_retries: settings.dispatch_max_retries.max(1),
        }
    }

    /// Point at a stand-in API (tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn classify_status(status: StatusCode) -> Option<AttemptError> {
        if status.is_success() {
            return None;
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Some(AttemptError::Transient(format!("HTTP {status}")))
        } else {
            Some(AttemptError::Permanent(format!("HTTP {status}")))
        }
    }

    async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, AttemptError> {
        let res = self
            .client
            .post(url)
            .header("Authorization", format!("Bot {}", self.token))
            .timeout(self.timeout)
            .json(body)
            .send()
            .await;
        match res {
            Ok(rsp) => match Self::classify_status(rsp.status()) {
                None => Ok(rsp),
                Some(err) => Err(err),
            },
            Err(e) => Err(AttemptError::Transient(format!("request failed: {e}"))),
        }
    }

    /// Post with retries on transient classes only. Backoff doubles from
    /// 500ms per attempt.
    async fn post_with_retries<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, AttemptError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            match self.post_json(url, body).await {
                Ok(rsp) => return Ok(rsp),
                Err(AttemptError::Permanent(e)) => return Err(AttemptError::Permanent(e)),
                Err(AttemptError::Transient(e)) => {
                    if attempt >= self.max_retries {
                        return Err(AttemptError::Transient(e));
                    }
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
            }
        }
    }

    async fn post_message(
        &self,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> Result<MessageRef, AttemptError> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let rsp = self.post_with_retries(&url, payload).await?;
        rsp.json::<MessageRef>()
            .await
            .map_err(|e| AttemptError::Transient(format!("message response body: {e}")))
    }

    async fn start_thread(&self, channel_id: &str, message_id: &str, name: &str) {
        let url = format!(
            "{}/channels/{}/messages/{}/threads",
            self.api_base, channel_id, message_id
        );
        // Truncate to Discord's thread-name limit.
        let name: String = name.chars().take(100).collect();
        let payload = ThreadPayload {
            name: if name.trim().is_empty() {
                "Discussion".to_string()
            } else {
                name
            },
        };
        // The message is already delivered at this point; a failed thread
        // creation is logged, not surfaced as a delivery failure.
        if let Err(AttemptError::Transient(e) | AttemptError::Permanent(e)) =
            self.post_with_retries(&url, &payload).await.map(|_| ())
        {
            warn!(target: "dispatch", channel = %channel_id, error = %e, "thread creation failed");
        }
    }
}

#[async_trait]
impl Deliver for DiscordSender {
    async fn send(&self, item: &NormalizedItem, source: &Source) -> DeliveryOutcome {
        let content = render_message(item, source);
        let payload = MessagePayload {
            content,
            flags: (!source.allow_embeds).then_some(SUPPRESS_EMBEDS),
        };

        match self.post_message(&source.target, &payload).await {
            Ok(msg) => {
                debug!(target: "dispatch", source = %source.id, link = %item.link, "delivered");
                if source.mode == DeliveryMode::Thread {
                    self.start_thread(&source.target, &msg.id, &item.title).await;
                }
                DeliveryOutcome::Delivered
            }
            Err(AttemptError::Transient(e)) => DeliveryOutcome::Transient(e),
            Err(AttemptError::Permanent(e)) => DeliveryOutcome::Permanent(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(DiscordSender::classify_status(StatusCode::OK).is_none());
        assert!(matches!(
            DiscordSender::classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(AttemptError::Transient(_))
        ));
        assert!(matches!(
            DiscordSender::classify_status(StatusCode::BAD_GATEWAY),
            Some(AttemptError::Transient(_))
        ));
        assert!(matches!(
            DiscordSender::classify_status(StatusCode::FORBIDDEN),
            Some(AttemptError::Permanent(_))
        ));
        assert!(matches!(
            DiscordSender::classify_status(StatusCode::NOT_FOUND),
            Some(AttemptError::Permanent(_))
        ));
    }
}
