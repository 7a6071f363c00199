//! Errors surfaced to the webhook caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Errors that reject an inbound webhook request.
///
/// Every variant is a client error: the request is answered with
/// `400 Bad Request` and nothing is broadcast.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The event-type header is missing or carries an unknown value
    #[error("unrecognized request: event-type header is {0:?}")]
    UnrecognizedRequest(Option<String>),

    /// The validation payload has no first element or no validation code
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    /// The batch body is not an array, or one of its elements failed to decode
    #[error("malformed batch event{}: {source}", .index.map(|i| format!(" at index {i}")).unwrap_or_default())]
    MalformedBatchEvent {
        index: Option<usize>,
        #[source]
        source: serde_json::Error,
    },

    /// The single-schema body failed to decode
    #[error("malformed single event: {0}")]
    MalformedSingleEvent(#[source] serde_json::Error),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
