//! Log channel - release digests as structured log lines.
//!
//! Useful when no external endpoint is configured, or to audit what the
//! notifier would have sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use gridview::sink::LogChannel;
//!
//! let channel = LogChannel::new();
//! // or with custom prefix
//! let channel = LogChannel::with_prefix("releases");
//! ```

use super::{ChannelError, Digest, OutboundChannel};
use async_trait::async_trait;
use tracing::info;

/// An outbound channel that logs each digest.
#[derive(Debug, Clone)]
pub struct LogChannel {
    prefix: String,
}

impl LogChannel {
    pub fn new() -> Self {
        Self {
            prefix: "release".to_string(),
        }
    }

    /// The prefix appears in the log message to tell channels apart.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, digest: &Digest) -> Result<(), ChannelError> {
        info!(
            prefix = %self.prefix,
            subject = %digest.subject,
            repository = %digest.repository,
            tag = %digest.tag,
            body = %digest.body,
            "[{}] {}: {}:{}",
            self.prefix,
            digest.subject,
            digest.repository,
            digest.tag
        );
        Ok(())
    }
}
