//! Notifier sinks.
//!
//! After a payload has been normalized and broadcast, the ingest pipeline
//! offers the batch to a [`NotifierSink`]. A sink may do nothing
//! ([`NoopSink`]) or forward a digest somewhere else ([`ReleaseNotifier`]).
//!
//! Sink failures never reach the webhook caller: the pipeline logs them and
//! answers the request as if the sink had succeeded.
//!
//! ## Outbound channels
//!
//! - [`LogChannel`]: writes the digest as a structured log line
//! - [`WebhookChannel`]: HTTP POST of the digest to an external URL
//!
//! ## Writing a sink
//!
//! ```rust,ignore
//! use gridview::sink::{NotifierSink, Offer, SinkError, SinkResult};
//! use async_trait::async_trait;
//!
//! struct CountingSink;
//!
//! #[async_trait]
//! impl NotifierSink for CountingSink {
//!     fn name(&self) -> &str {
//!         "counting"
//!     }
//!
//!     async fn offer(&self, offer: &Offer<'_>) -> Result<SinkResult, SinkError> {
//!         Ok(SinkResult::skipped(self.name(), offer.events.len()))
//!     }
//! }
//! ```

pub mod ledger;
pub mod log;
pub mod release;
pub mod webhook;

use crate::event::CanonicalEvent;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use ledger::{Ledger, LedgerEntry, LedgerError};
pub use log::LogChannel;
pub use release::ReleaseNotifier;
pub use webhook::WebhookChannel;

/// Which pipeline produced an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkContext {
    Validation,
    Batch,
    Single,
}

impl SinkContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkContext::Validation => "validation",
            SinkContext::Batch => "batch",
            SinkContext::Single => "single",
        }
    }
}

impl fmt::Display for SinkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized payload handed to a sink.
#[derive(Debug, Clone, Copy)]
pub struct Offer<'a> {
    pub context: SinkContext,
    /// Request body as received
    pub raw_payload: &'a str,
    /// Events normalized from the body, in payload order
    pub events: &'a [CanonicalEvent],
}

/// Errors raised by a sink. Always recovered by the caller.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("outbound channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Errors from an outbound digest channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// HTTP request failed (for webhook channels)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic delivery failure
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Summary of what a sink did with an offer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkResult {
    pub sink_name: String,
    /// Digests forwarded through the outbound channel
    pub forwarded: usize,
    /// Events that needed no forwarding
    pub skipped: usize,
}

impl SinkResult {
    pub fn skipped(sink_name: &str, skipped: usize) -> Self {
        Self {
            sink_name: sink_name.to_string(),
            forwarded: 0,
            skipped,
        }
    }
}

/// A release digest sent through an [`OutboundChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    pub repository: String,
    pub tag: String,
    pub name_label: String,
    pub tag_label: String,
}

/// Where release digests go.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, digest: &Digest) -> Result<(), ChannelError>;
}

/// Receives every normalized payload after broadcast.
#[async_trait]
pub trait NotifierSink: Send + Sync {
    /// Returns the unique name of this sink (e.g., "noop", "release-notifier")
    fn name(&self) -> &str;

    /// Inspect an offer. Errors are logged by the caller and swallowed.
    async fn offer(&self, offer: &Offer<'_>) -> Result<SinkResult, SinkError>;
}

/// A sink that ignores every offer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl NotifierSink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn offer(&self, offer: &Offer<'_>) -> Result<SinkResult, SinkError> {
        Ok(SinkResult::skipped(self.name(), offer.events.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_sink_skips_everything() {
        let events = vec![
            CanonicalEvent::new("1", "t", "s", "now", "{}"),
            CanonicalEvent::new("2", "t", "s", "now", "{}"),
        ];
        let offer = Offer {
            context: SinkContext::Batch,
            raw_payload: "[{},{}]",
            events: &events,
        };

        let result = NoopSink.offer(&offer).await.unwrap();
        assert_eq!(result.sink_name, "noop");
        assert_eq!(result.forwarded, 0);
        assert_eq!(result.skipped, 2);
    }

    #[test]
    fn test_context_labels() {
        assert_eq!(SinkContext::Validation.to_string(), "validation");
        assert_eq!(SinkContext::Batch.as_str(), "batch");
        assert_eq!(SinkContext::Single.as_str(), "single");
    }
}
