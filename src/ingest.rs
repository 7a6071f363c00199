//! The ingest pipeline.
//!
//! ```text
//! headers + body
//!     │
//!     ▼
//! classify ──► Handshake ──────────► validate ─┐
//!          ├─► BatchNotification ──► normalize_batch ─┤
//!          └─► SingleNotification ─► normalize_single ┤
//!                                                     ▼
//!                                      Hub::broadcast (each event, in order)
//!                                                     │
//!                                                     ▼
//!                                      NotifierSink::offer (bounded, errors logged)
//! ```
//!
//! Everything runs sequentially inside one request. A classification or
//! normalization error stops the request before anything is broadcast. The
//! sink offer is cut off after the offer timeout so a stuck channel cannot
//! hold the response.

use crate::classify::{classify, Classification};
use crate::error::IngestError;
use crate::event::CanonicalEvent;
use crate::handshake::{self, ValidationResponse};
use crate::hub::Hub;
use crate::normalize::{normalize_batch, normalize_single};
use crate::sink::{NotifierSink, Offer, SinkContext};
use axum::http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default upper bound on one sink offer
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(2);

/// What a successfully ingested request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Handshake completed; the response must be echoed to the caller
    Validated(ValidationResponse),
    /// Notification accepted and broadcast
    Accepted { events: usize },
}

/// Runs classification, normalization, broadcast and the sink offer.
#[derive(Clone)]
pub struct Ingestor {
    hub: Arc<Hub>,
    sink: Arc<dyn NotifierSink>,
    offer_timeout: Duration,
}

impl Ingestor {
    pub fn new(hub: Arc<Hub>, sink: Arc<dyn NotifierSink>) -> Self {
        Self {
            hub,
            sink,
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
        }
    }

    /// Set how long a sink offer may run before it is abandoned.
    pub fn with_offer_timeout(mut self, offer_timeout: Duration) -> Self {
        self.offer_timeout = offer_timeout;
        self
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Process one webhook request.
    ///
    /// A handshake also broadcasts its validation event to subscribers
    /// before the response is returned, so live viewers see validation
    /// attempts alongside regular notifications.
    pub async fn ingest(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let classification = classify(headers, body)?;

        let (context, events, outcome) = match classification {
            Classification::Handshake => {
                let handshake = handshake::validate(body)?;
                info!(event_id = %handshake.event.id(), "Subscription validation received");
                (
                    SinkContext::Validation,
                    vec![handshake.event],
                    IngestOutcome::Validated(handshake.response),
                )
            }
            Classification::BatchNotification => {
                let events = normalize_batch(body)?;
                let outcome = IngestOutcome::Accepted {
                    events: events.len(),
                };
                (SinkContext::Batch, events, outcome)
            }
            Classification::SingleNotification => {
                let event = normalize_single(body)?;
                (
                    SinkContext::Single,
                    vec![event],
                    IngestOutcome::Accepted { events: 1 },
                )
            }
        };

        self.publish(&events);
        self.offer(context, body, &events).await;

        Ok(outcome)
    }

    fn publish(&self, events: &[CanonicalEvent]) {
        for event in events {
            let report = self.hub.broadcast(event);
            debug!(
                event_id = %event.id(),
                event_type = %event.event_type(),
                delivered = report.delivered,
                "Event published"
            );
        }
    }

    async fn offer(&self, context: SinkContext, body: &[u8], events: &[CanonicalEvent]) {
        let raw_payload = String::from_utf8_lossy(body);
        let offer = Offer {
            context,
            raw_payload: &raw_payload,
            events,
        };

        let offered = tokio::time::timeout(self.offer_timeout, self.sink.offer(&offer)).await;
        let Ok(offered) = offered else {
            warn!(
                sink = %self.sink.name(),
                context = %context,
                timeout_ms = self.offer_timeout.as_millis() as u64,
                "Sink timed out, continuing"
            );
            return;
        };

        match offered {
            Ok(result) => debug!(
                sink = %self.sink.name(),
                context = %context,
                forwarded = result.forwarded,
                skipped = result.skipped,
                "Sink offer handled"
            ),
            Err(e) => warn!(
                sink = %self.sink.name(),
                context = %context,
                error = %e,
                "Sink failed, continuing"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::EVENT_TYPE_HEADER;
    use crate::hub::PushMessage;
    use crate::sink::{NoopSink, SinkError, SinkResult};
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    fn headers(event_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_TYPE_HEADER, HeaderValue::from_str(event_type).unwrap());
        headers
    }

    fn ingestor() -> Ingestor {
        Ingestor::new(Arc::new(Hub::new(64)), Arc::new(NoopSink))
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<PushMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn grid_element(id: &str) -> String {
        format!(
            r#"{{"id":"{id}","eventType":"Microsoft.Storage.BlobCreated","subject":"/blobs/{id}","eventTime":"2020-01-01T00:00:00Z","data":{{}}}}"#
        )
    }

    /// Records offers and optionally fails them.
    #[derive(Default)]
    struct RecordingSink {
        offers: Mutex<Vec<(SinkContext, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl NotifierSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn offer(&self, offer: &Offer<'_>) -> Result<SinkResult, SinkError> {
            self.offers.lock().push((offer.context, offer.events.len()));
            if self.fail {
                return Err(SinkError::Channel(crate::sink::ChannelError::Failed(
                    "boom".into(),
                )));
            }
            Ok(SinkResult::skipped(self.name(), offer.events.len()))
        }
    }

    #[tokio::test]
    async fn test_batch_broadcasts_in_order() {
        let ingestor = ingestor();
        let (_id, mut rx) = ingestor.hub().join();

        let elements: Vec<String> = (0..4).map(|i| grid_element(&i.to_string())).collect();
        let body = format!("[{}]", elements.join(","));

        let outcome = ingestor
            .ingest(&headers("Notification"), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Accepted { events: 4 });

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 4);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.arguments[0], i.to_string());
            assert_eq!(frame.arguments[2], format!("/blobs/{i}"));
            assert_eq!(frame.arguments[4], elements[i]);
        }
    }

    #[tokio::test]
    async fn test_handshake_echoes_and_broadcasts_once() {
        let ingestor = ingestor();
        let (_id, mut rx) = ingestor.hub().join();

        let body = r#"[{ "id":"1", "eventType":"Microsoft.EventGrid.SubscriptionValidationEvent", "subject":"s", "eventTime":"2020-01-01T00:00:00Z", "data": { "validationCode": "abc123" } }]"#;

        let outcome = ingestor
            .ingest(&headers("SubscriptionValidation"), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Validated(ValidationResponse {
                validation_response: "abc123".to_string()
            })
        );

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].arguments[0], "1");
    }

    #[tokio::test]
    async fn test_single_notification() {
        let ingestor = ingestor();
        let (_id, mut rx) = ingestor.hub().join();

        let body = br#"{"specversion":"1.0","id":"c1","type":"demo.created","subject":"/x","time":"2021-01-01T00:00:00Z"}"#;
        let outcome = ingestor.ingest(&headers("Notification"), body).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Accepted { events: 1 });

        let frames = drain(&mut rx);
        assert_eq!(frames[0].arguments[1], "demo.created");
    }

    #[tokio::test]
    async fn test_unrecognized_header_broadcasts_nothing() {
        let ingestor = ingestor();
        let (_id, mut rx) = ingestor.hub().join();

        let body = format!("[{}]", grid_element("1"));
        let err = ingestor
            .ingest(&HeaderMap::new(), body.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnrecognizedRequest(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_bad_element_broadcasts_nothing() {
        let ingestor = ingestor();
        let (_id, mut rx) = ingestor.hub().join();

        let bad = r#"{"eventType":"t","subject":"s","eventTime":"2020-01-01T00:00:00Z"}"#;
        let body = format!("[{},{},{}]", grid_element("1"), grid_element("2"), bad);

        let err = ingestor
            .ingest(&headers("Notification"), body.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MalformedBatchEvent { .. }));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_object_without_specversion_is_rejected() {
        let ingestor = ingestor();
        let err = ingestor
            .ingest(&headers("Notification"), br#"{"id":"1","type":"t"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MalformedBatchEvent { index: None, .. }));
    }

    #[tokio::test]
    async fn test_sink_sees_context_and_events() {
        let sink = Arc::new(RecordingSink::default());
        let ingestor = Ingestor::new(Arc::new(Hub::new(8)), sink.clone());

        let body = format!("[{},{}]", grid_element("1"), grid_element("2"));
        ingestor
            .ingest(&headers("Notification"), body.as_bytes())
            .await
            .unwrap();

        assert_eq!(*sink.offers.lock(), vec![(SinkContext::Batch, 2)]);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_request() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let ingestor = Ingestor::new(Arc::new(Hub::new(8)), sink.clone());
        let (_id, mut rx) = ingestor.hub().join();

        let body = format!("[{}]", grid_element("1"));
        let outcome = ingestor
            .ingest(&headers("Notification"), body.as_bytes())
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Accepted { events: 1 });
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(sink.offers.lock().len(), 1);
    }

    /// Sleeps past any reasonable timeout, then fails.
    struct StalledSink;

    #[async_trait]
    impl NotifierSink for StalledSink {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn offer(&self, _offer: &Offer<'_>) -> Result<SinkResult, SinkError> {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            Err(SinkError::Channel(crate::sink::ChannelError::Failed(
                "late".into(),
            )))
        }
    }

    #[tokio::test]
    async fn test_stalled_sink_does_not_hold_response() {
        let ingestor = Ingestor::new(Arc::new(Hub::new(8)), Arc::new(StalledSink))
            .with_offer_timeout(Duration::from_millis(50));
        let (_id, mut rx) = ingestor.hub().join();

        let body = format!("[{}]", grid_element("1"));
        let started = std::time::Instant::now();
        let outcome = ingestor
            .ingest(&headers("Notification"), body.as_bytes())
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Accepted { events: 1 });
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_sink_not_offered_on_rejection() {
        let sink = Arc::new(RecordingSink::default());
        let ingestor = Ingestor::new(Arc::new(Hub::new(8)), sink.clone());

        let _ = ingestor.ingest(&headers("SubscriptionValidation"), b"[]").await;
        assert!(sink.offers.lock().is_empty());
    }
}
