//! Subscription validation handshake.
//!
//! The platform proves the endpoint is willing to receive events by sending
//! a batch-schema array with one element whose `data.validationCode` must be
//! echoed back as `{ "validationResponse": "<code>" }`.

use crate::error::IngestError;
use crate::event::CanonicalEvent;
use crate::normalize::{decode_grid, split_batch};
use serde::Serialize;
use serde_json::Value;

/// The only response body accepted for a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResponse {
    #[serde(rename = "validationResponse")]
    pub validation_response: String,
}

/// A decoded handshake: the code to echo plus the validation event itself.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub response: ValidationResponse,
    pub event: CanonicalEvent,
}

/// Parse a handshake body.
///
/// Only the first element is used. An empty array, an undecodable first
/// element, or a missing `data.validationCode` is a [`IngestError::MalformedHandshake`].
pub fn validate(body: &[u8]) -> Result<Handshake, IngestError> {
    let elements =
        split_batch(body).map_err(|e| IngestError::MalformedHandshake(e.to_string()))?;

    let first = elements
        .first()
        .ok_or_else(|| IngestError::MalformedHandshake("empty event array".to_string()))?;

    let event = decode_grid(first).map_err(|e| IngestError::MalformedHandshake(e.to_string()))?;

    let code = event
        .data()
        .as_ref()
        .and_then(|data| data.get("validationCode"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| IngestError::MalformedHandshake("missing data.validationCode".to_string()))?;

    Ok(Handshake {
        response: ValidationResponse {
            validation_response: code,
        },
        event,
    })
}
