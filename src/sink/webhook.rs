//! Webhook channel - release digests POSTed to an external URL.
//!
//! # Example
//!
//! ```rust,ignore
//! use gridview::sink::WebhookChannel;
//! use std::time::Duration;
//!
//! let channel = WebhookChannel::new("https://discord.com/api/webhooks/...")
//!     .with_timeout(Duration::from_secs(10))
//!     .with_discord_format();  // Use Discord embed format
//! ```

use super::{ChannelError, Digest, OutboundChannel};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for webhook requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Embed color for release announcements
const DISCORD_RELEASE_COLOR: u32 = 0x57F287;

/// An outbound channel that POSTs each digest to an HTTP endpoint.
///
/// Retries are off unless configured; when enabled only 5xx responses and
/// transport errors are retried.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    url: String,

    /// HTTP client (reused for connection pooling)
    client: Client,

    timeout: Duration,

    retries: u32,

    discord_format: bool,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            discord_format: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Send digests as a Discord embed instead of plain JSON
    pub fn with_discord_format(mut self) -> Self {
        self.discord_format = true;
        self
    }

    fn build_payload(&self, digest: &Digest) -> Value {
        if self.discord_format {
            json!({
                "embeds": [{
                    "title": digest.subject,
                    "description": digest.body,
                    "color": DISCORD_RELEASE_COLOR,
                    "fields": [
                        { "name": digest.name_label, "value": digest.repository, "inline": true },
                        { "name": digest.tag_label, "value": digest.tag, "inline": true },
                    ]
                }]
            })
        } else {
            json!({
                "subject": digest.subject,
                "body": digest.body,
                "repository": digest.repository,
                "tag": digest.tag,
                "labels": {
                    "name": digest.name_label,
                    "tag": digest.tag_label,
                },
            })
        }
    }
}

#[async_trait]
impl OutboundChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, digest: &Digest) -> Result<(), ChannelError> {
        let payload = self.build_payload(digest);
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                debug!(attempt, max_retries = self.retries, "Retrying webhook request");
            }

            match self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        info!(
                            url = %self.url,
                            status = %status,
                            repository = %digest.repository,
                            tag = %digest.tag,
                            "Release digest delivered"
                        );
                        return Ok(());
                    }

                    if status.is_client_error() {
                        warn!(status = %status, url = %self.url, "Webhook returned client error");
                        return Err(ChannelError::Failed(format!(
                            "webhook returned status {status}"
                        )));
                    }

                    warn!(
                        status = %status,
                        url = %self.url,
                        attempt,
                        "Webhook returned server error"
                    );
                    last_error = Some(ChannelError::Failed(format!("server error: {status}")));
                }
                Err(e) => {
                    warn!(error = %e, url = %self.url, attempt, "Webhook request failed");
                    last_error = Some(ChannelError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ChannelError::Failed("unknown error".into())))
    }
}
