//! Conversion of webhook bodies into [`CanonicalEvent`] values.

use crate::error::IngestError;
use crate::event::{CanonicalEvent, CloudEnvelope, GridEnvelope, WireEvent};
use serde_json::value::RawValue;

/// Split a batch body into its elements, keeping each element's exact text.
pub(crate) fn split_batch(body: &[u8]) -> Result<Vec<Box<RawValue>>, IngestError> {
    serde_json::from_slice(body)
        .map_err(|source| IngestError::MalformedBatchEvent { index: None, source })
}

/// Decode one batch element into a canonical event.
pub(crate) fn decode_grid(raw: &RawValue) -> Result<CanonicalEvent, serde_json::Error> {
    let envelope: GridEnvelope = serde_json::from_str(raw.get())?;
    Ok(WireEvent::Grid(envelope).into_canonical(raw.get()))
}

/// Normalize a batch body.
///
/// All-or-nothing: if any element fails to decode, no events are returned.
/// An empty array yields an empty vector.
pub fn normalize_batch(body: &[u8]) -> Result<Vec<CanonicalEvent>, IngestError> {
    split_batch(body)?
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            decode_grid(raw).map_err(|source| IngestError::MalformedBatchEvent {
                index: Some(index),
                source,
            })
        })
        .collect()
}

/// Normalize a single-schema body into exactly one event.
pub fn normalize_single(body: &[u8]) -> Result<CanonicalEvent, IngestError> {
    let envelope: CloudEnvelope =
        serde_json::from_slice(body).map_err(IngestError::MalformedSingleEvent)?;
    let raw = String::from_utf8_lossy(body);
    Ok(WireEvent::Cloud(envelope).into_canonical(raw))
}
