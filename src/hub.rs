//! Fan-out hub for live subscribers.
//!
//! The [`Hub`] owns every connected subscriber session and multicasts each
//! [`CanonicalEvent`] to all of them on a named channel (`gridupdate` by
//! default).
//!
//! ```text
//! POST /api/updates ──► Hub::broadcast(event)
//!                          │  snapshot of sessions (read lock)
//!                          ├──► session A queue ──► writer task ──► WebSocket
//!                          ├──► session B queue ──► writer task ──► WebSocket
//!                          └──► session C queue (full: frame dropped for C only)
//! ```
//!
//! Broadcasting never awaits a subscriber. Each session has a bounded queue
//! and a frame that does not fit is dropped for that session alone. There is
//! no acknowledgment, retry, or replay.

use crate::event::CanonicalEvent;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::GRID_UPDATE_CHANNEL;

/// Default per-session queue length
pub const DEFAULT_SESSION_QUEUE: usize = 256;

/// Unique subscriber session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session_{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A push frame as seen by subscribers.
///
/// ```json
/// {"target":"gridupdate","arguments":["<id>","<type>","<subject>","<timestamp>","<raw>"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub target: String,
    pub arguments: Vec<String>,
}

impl PushMessage {
    /// Serialize an event into the frame text for `channel`.
    pub fn encode(channel: &str, event: &CanonicalEvent) -> String {
        json!({
            "target": channel,
            "arguments": event.arguments(),
        })
        .to_string()
    }
}

/// What happened to one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions in the snapshot taken at call time
    pub sessions: usize,
    /// Frames enqueued
    pub delivered: usize,
    /// Frames dropped because a session queue was full
    pub dropped: usize,
    /// Sessions found closed and pruned
    pub disconnected: usize,
}

/// Running totals across all broadcasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub broadcasts: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Registry of connected sessions and the broadcast path.
///
/// Meant to be shared behind an `Arc`. Join, leave and broadcast may be
/// called concurrently from any task.
pub struct Hub {
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<Arc<str>>>>,
    channel: String,
    session_queue: usize,
    counters: Counters,
}

impl Hub {
    /// Create a hub on the `gridupdate` channel.
    pub fn new(session_queue: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            channel: GRID_UPDATE_CHANNEL.to_string(),
            session_queue: session_queue.max(1),
            counters: Counters::default(),
        }
    }

    /// Use a different channel name for push frames.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Register a new session and return its ID and frame receiver.
    pub fn join(&self) -> (SessionId, mpsc::Receiver<Arc<str>>) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.session_queue);
        self.sessions.write().insert(id.clone(), tx);
        debug!(session_id = %id, "Session joined");
        (id, rx)
    }

    /// Remove a session. Returns false if it was already gone.
    pub fn leave(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Session left");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Push an event to every session connected right now.
    ///
    /// The session set is copied under a read lock and delivery happens
    /// after the lock is released, so sessions joining mid-broadcast are not
    /// included and sessions leaving mid-broadcast cannot fail it.
    pub fn broadcast(&self, event: &CanonicalEvent) -> BroadcastReport {
        let frame: Arc<str> = Arc::from(PushMessage::encode(&self.channel, event));

        let snapshot: Vec<(SessionId, mpsc::Sender<Arc<str>>)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect();

        let mut report = BroadcastReport {
            sessions: snapshot.len(),
            ..Default::default()
        };
        let mut closed = Vec::new();

        for (id, tx) in snapshot {
            match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session_id = %id,
                        event_id = %event.id(),
                        "Session queue full, dropping frame"
                    );
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in &closed {
            self.leave(id);
        }
        report.disconnected = closed.len();

        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);

        debug!(
            channel = %self.channel,
            event_id = %event.id(),
            sessions = report.sessions,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast complete"
        );

        report
    }

    /// Drop every session. Their receivers see the end of the stream.
    pub fn close(&self) -> usize {
        let mut sessions = self.sessions.write();
        let count = sessions.len();
        sessions.clear();
        info!(sessions = count, "Hub closed");
        count
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_QUEUE)
    }
}

/// Drive one WebSocket subscriber until either side goes away.
///
/// A writer task forwards queued frames and pings every `heartbeat`; a
/// reader task watches for close. The session is removed when either ends.
pub async fn serve_session(socket: WebSocket, hub: Arc<Hub>, heartbeat: Duration) {
    let (session_id, mut rx) = hub.join();
    info!(session_id = %session_id, "Subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = session_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = ws_tx.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(session_id = %writer_id, "Sent ping");
                }
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let WsMessage::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.leave(&session_id);
    info!(session_id = %session_id, "Subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn event(id: &str) -> CanonicalEvent {
        CanonicalEvent::new(
            id,
            "Microsoft.Storage.BlobCreated",
            "/blobs/a",
            "2020-01-01T00:00:00Z",
            format!(r#"{{"id":"{id}"}}"#),
        )
    }

    fn decode(frame: &str) -> PushMessage {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session_"));
    }

    #[test]
    fn test_join_and_leave() {
        let hub = Hub::new(8);
        let (a, _rx_a) = hub.join();
        let (b, _rx_b) = hub.join();
        assert_eq!(hub.session_count(), 2);

        assert!(hub.leave(&a));
        assert!(!hub.leave(&a));
        assert_eq!(hub.session_count(), 1);

        hub.leave(&b);
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn test_broadcast_carries_positional_arguments() {
        let hub = Hub::new(8);
        let (_id, mut rx) = hub.join();

        let report = hub.broadcast(&event("e1"));
        assert_eq!(report.delivered, 1);

        let frame = decode(&rx.try_recv().unwrap());
        assert_eq!(frame.target, "gridupdate");
        assert_eq!(
            frame.arguments,
            vec![
                "e1",
                "Microsoft.Storage.BlobCreated",
                "/blobs/a",
                "2020-01-01T00:00:00Z",
                r#"{"id":"e1"}"#,
            ]
        );
    }

    #[test]
    fn test_broadcast_with_no_sessions() {
        let hub = Hub::default();
        let report = hub.broadcast(&event("e1"));
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(hub.stats().broadcasts, 1);
    }

    #[test]
    fn test_custom_channel_name() {
        let hub = Hub::new(4).with_channel("audit");
        let (_id, mut rx) = hub.join();
        hub.broadcast(&event("e1"));
        assert_eq!(decode(&rx.try_recv().unwrap()).target, "audit");
    }

    #[test]
    fn test_full_session_does_not_affect_others() {
        let hub = Hub::new(1);
        let (_slow, _slow_rx) = hub.join();
        let (_fast, mut fast_rx) = hub.join();

        hub.broadcast(&event("e1"));
        assert!(fast_rx.try_recv().is_ok());

        // slow session never drained: second frame is dropped for it only
        let report = hub.broadcast(&event("e2"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(decode(&fast_rx.try_recv().unwrap()).arguments[0], "e2");
        assert_eq!(hub.stats().dropped, 1);
    }

    #[test]
    fn test_closed_session_is_pruned() {
        let hub = Hub::new(4);
        let (_gone, gone_rx) = hub.join();
        let (_live, mut live_rx) = hub.join();
        drop(gone_rx);

        let report = hub.broadcast(&event("e1"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.disconnected, 1);
        assert_eq!(hub.session_count(), 1);
        assert!(live_rx.try_recv().is_ok());
    }

    #[test]
    fn test_late_joiner_misses_earlier_events() {
        let hub = Hub::new(4);
        hub.broadcast(&event("before"));
        let (_id, mut rx) = hub.join();
        hub.broadcast(&event("after"));

        assert_eq!(decode(&rx.try_recv().unwrap()).arguments[0], "after");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_every_receiver() {
        let hub = Hub::new(4);
        let (_a, mut rx_a) = hub.join();
        let (_b, mut rx_b) = hub.join();

        assert_eq!(hub.close(), 2);
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_broadcasts_reach_every_session_once() {
        const SESSIONS: usize = 50;
        const EVENTS: usize = 1000;
        const PRODUCERS: usize = 20;

        let hub = Arc::new(Hub::new(EVENTS));
        let receivers: Vec<_> = (0..SESSIONS).map(|_| hub.join().1).collect();

        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let hub = Arc::clone(&hub);
            producers.push(tokio::spawn(async move {
                for i in (p..EVENTS).step_by(PRODUCERS) {
                    hub.broadcast(&event(&i.to_string()));
                    tokio::task::yield_now().await;
                }
            }));
        }

        // churn: sessions joining and leaving during the broadcasts
        let churn_hub = Arc::clone(&hub);
        let churn = tokio::spawn(async move {
            for _ in 0..200 {
                let (id, _rx) = churn_hub.join();
                tokio::task::yield_now().await;
                churn_hub.leave(&id);
            }
        });

        for producer in producers {
            producer.await.unwrap();
        }
        churn.await.unwrap();

        for mut rx in receivers {
            let mut seen = HashSet::new();
            while let Ok(frame) = rx.try_recv() {
                let id = decode(&frame).arguments[0].clone();
                assert!(seen.insert(id), "duplicate delivery");
            }
            assert_eq!(seen.len(), EVENTS);
        }

        let stats = hub.stats();
        assert_eq!(stats.broadcasts, EVENTS as u64);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_sequential_broadcasts_keep_order_per_session() {
        let hub = Hub::new(16);
        let (_id, mut rx) = hub.join();

        for i in 0..10 {
            hub.broadcast(&event(&i.to_string()));
        }

        for i in 0..10 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(decode(&frame).arguments[0], i.to_string());
        }
    }
}
