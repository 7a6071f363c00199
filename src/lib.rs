//! # gridview
//!
//! Receives Event Grid webhook deliveries, completes the subscription
//! handshake, and pushes every event live to connected WebSocket viewers.
//!
//! ## Architecture
//!
//! ```text
//! Event Grid -> POST /api/updates -> classify -> normalize -> Hub -> WebSocket viewers
//!                                                              \-> NotifierSink -> ledger + channel
//! ```
//!
//! ## Modules
//!
//! - [`classify`]: handshake vs. batch vs. single-envelope detection
//! - [`event`]: wire envelopes and the canonical event record
//! - [`normalize`]: wire bodies into canonical events
//! - [`handshake`]: subscription validation
//! - [`hub`]: subscriber sessions and broadcast
//! - [`ingest`]: the per-request pipeline
//! - [`sink`]: post-broadcast notifier sinks and release ledger
//! - [`api`]: axum routes

pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod handshake;
pub mod hub;
pub mod ingest;
pub mod normalize;
pub mod shutdown;
pub mod sink;

// Re-export commonly used types at crate root
pub use error::IngestError;
pub use event::CanonicalEvent;
pub use hub::Hub;
pub use ingest::{IngestOutcome, Ingestor};
pub use sink::{NotifierSink, Offer, SinkContext};

/// Channel name carried by every push frame
pub const GRID_UPDATE_CHANNEL: &str = "gridupdate";
