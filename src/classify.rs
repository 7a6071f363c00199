//! Request classification.
//!
//! Decides, from the event-type header and a structural probe of the body,
//! which pipeline an inbound request takes:
//!
//! ```text
//! aeg-event-type             | body probe                          | result
//! ---------------------------|-------------------------------------|-------------------
//! SubscriptionValidation     | (not inspected)                     | Handshake
//! Notification               | object with non-empty `specversion` | SingleNotification
//! Notification               | anything else                       | BatchNotification
//! missing / other            | (not inspected)                     | UnrecognizedRequest
//! ```
//!
//! The probe is not validation. A body that is a JSON object without
//! `specversion` is routed to the batch path and rejected there.

use crate::error::IngestError;
use axum::http::HeaderMap;
use serde_json::{Map, Value};
use tracing::debug;

/// Header naming the kind of delivery
pub const EVENT_TYPE_HEADER: &str = "aeg-event-type";

/// Header value for the one-time subscription handshake
pub const SUBSCRIPTION_VALIDATION: &str = "SubscriptionValidation";

/// Header value for event notifications
pub const NOTIFICATION: &str = "Notification";

/// How an inbound request will be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Handshake,
    BatchNotification,
    SingleNotification,
}

/// Outcome of probing a body for the single-envelope schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaProbe {
    /// A JSON object carrying this non-empty `specversion`
    Single(String),
    /// Not a JSON object, or no usable `specversion`
    NotSingle,
}

/// Classify an inbound request.
pub fn classify(headers: &HeaderMap, body: &[u8]) -> Result<Classification, IngestError> {
    let event_type = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok());

    let classification = match event_type {
        Some(SUBSCRIPTION_VALIDATION) => Classification::Handshake,
        Some(NOTIFICATION) => match probe_single(body) {
            SchemaProbe::Single(_) => Classification::SingleNotification,
            SchemaProbe::NotSingle => Classification::BatchNotification,
        },
        other => {
            return Err(IngestError::UnrecognizedRequest(other.map(str::to_string)));
        }
    };

    debug!(?classification, body_len = body.len(), "Request classified");
    Ok(classification)
}

/// Try to read the body as one JSON object with a `specversion` string.
pub fn probe_single(body: &[u8]) -> SchemaProbe {
    let object = match serde_json::from_slice::<Map<String, Value>>(body) {
        Ok(object) => object,
        Err(_) => return SchemaProbe::NotSingle,
    };

    match object.get("specversion").and_then(Value::as_str) {
        Some(version) if !version.is_empty() => SchemaProbe::Single(version.to_string()),
        _ => SchemaProbe::NotSingle,
    }
}
