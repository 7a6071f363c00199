//! Event types for gridview.
//!
//! Two wire schemas arrive over the webhook endpoint:
//!
//! - [`GridEnvelope`]: the batch schema, delivered as a JSON array of
//!   `{ id, eventType, subject, eventTime, data }` objects.
//! - [`CloudEnvelope`]: the single schema, one `{ specversion, id, type,
//!   subject, time, data }` object per request.
//!
//! Both are converted at the boundary into one [`CanonicalEvent`], which is
//! what the hub pushes and what the notifier sink inspects.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat};
use serde::Deserialize;
use serde_json::Value;

/// One element of a batch notification body.
///
/// # Example
///
/// ```json
/// {
///   "id": "2d1781af-3a4c-4d7c-bd0c-e34b19da4e66",
///   "eventType": "Microsoft.ContainerRegistry.ImagePushed",
///   "subject": "naas-core:1.4.2",
///   "eventTime": "2020-01-01T00:00:00Z",
///   "data": { "target": { "repository": "naas-core", "tag": "1.4.2" } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct GridEnvelope {
    pub id: String,

    #[serde(rename = "eventType")]
    pub event_type: String,

    pub subject: String,

    #[serde(rename = "eventTime")]
    pub event_time: EventTime,

    /// Event-specific payload, kept untyped
    #[serde(default)]
    pub data: Value,
}

/// A batch `eventTime`, with or without a UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

impl EventTime {
    /// RFC 3339 text (`Z` for UTC); a local time is rendered without offset.
    pub fn render(&self) -> String {
        match self {
            EventTime::Zoned(time) => time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            EventTime::Local(time) => time.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        }
    }
}

/// A single-schema notification body.
///
/// `subject` and `time` are optional in this schema and default to empty.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudEnvelope {
    pub specversion: String,

    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub time: String,

    #[serde(default)]
    pub data: Value,
}

/// A decoded envelope tagged with the schema it came from.
#[derive(Debug, Clone)]
pub enum WireEvent {
    Grid(GridEnvelope),
    Cloud(CloudEnvelope),
}

impl WireEvent {
    /// Convert into the canonical record, attaching the original text.
    ///
    /// `eventType`/`type` and `eventTime`/`time` are mapped per schema.
    pub fn into_canonical(self, raw_payload: impl Into<String>) -> CanonicalEvent {
        match self {
            WireEvent::Grid(env) => CanonicalEvent {
                id: env.id,
                event_type: env.event_type,
                subject: env.subject,
                timestamp: env.event_time.render(),
                raw_payload: raw_payload.into(),
            },
            WireEvent::Cloud(env) => CanonicalEvent {
                id: env.id,
                event_type: env.event_type,
                subject: env.subject,
                timestamp: env.time,
                raw_payload: raw_payload.into(),
            },
        }
    }
}

/// The schema-independent event record broadcast to subscribers.
///
/// Immutable once built; fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    id: String,
    event_type: String,
    subject: String,
    timestamp: String,
    raw_payload: String,
}

impl CanonicalEvent {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        subject: impl Into<String>,
        timestamp: impl Into<String>,
        raw_payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            subject: subject.into(),
            timestamp: timestamp.into(),
            raw_payload: raw_payload.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The event exactly as it was serialized on the wire
    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    /// Push arguments in channel order: id, type, subject, timestamp, raw.
    pub fn arguments(&self) -> [&str; 5] {
        [
            &self.id,
            &self.event_type,
            &self.subject,
            &self.timestamp,
            &self.raw_payload,
        ]
    }

    /// Re-parse the raw payload to reach into `data`.
    pub fn data(&self) -> Option<Value> {
        serde_json::from_str::<Value>(&self.raw_payload)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(Value::take))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_envelope_deserialize() {
        let json_str = r#"{
            "id": "1",
            "eventType": "Microsoft.Storage.BlobCreated",
            "subject": "/blobs/a.txt",
            "eventTime": "2020-01-01T00:00:00Z",
            "data": {"url": "https://example.com/a.txt"}
        }"#;

        let env: GridEnvelope = serde_json::from_str(json_str).unwrap();
        assert_eq!(env.id, "1");
        assert_eq!(env.event_type, "Microsoft.Storage.BlobCreated");
        assert_eq!(env.data["url"], "https://example.com/a.txt");
    }

    #[test]
    fn test_grid_envelope_rejects_bad_time() {
        let json_str = r#"{
            "id": "1", "eventType": "t", "subject": "s",
            "eventTime": "yesterday", "data": {}
        }"#;
        assert!(serde_json::from_str::<GridEnvelope>(json_str).is_err());
    }

    #[test]
    fn test_grid_envelope_accepts_time_without_offset() {
        let raw = r#"{"id":"1","eventType":"t","subject":"s","eventTime":"2020-01-01T00:00:00"}"#;
        let env: GridEnvelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(env.event_time, EventTime::Local(_)));

        let event = WireEvent::Grid(env).into_canonical(raw);
        assert_eq!(event.timestamp(), "2020-01-01T00:00:00");
    }

    #[test]
    fn test_local_time_keeps_fraction() {
        let raw = r#"{"id":"1","eventType":"t","subject":"s","eventTime":"2020-01-01T10:15:30.123"}"#;
        let env: GridEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.event_time.render(), "2020-01-01T10:15:30.123");
    }

    #[test]
    fn test_cloud_envelope_optional_fields() {
        let json_str = r#"{"specversion": "1.0", "id": "9", "type": "demo.created"}"#;

        let env: CloudEnvelope = serde_json::from_str(json_str).unwrap();
        assert_eq!(env.event_type, "demo.created");
        assert!(env.subject.is_empty());
        assert!(env.time.is_empty());
        assert!(env.data.is_null());
    }

    #[test]
    fn test_grid_into_canonical() {
        let raw = r#"{"id":"1","eventType":"t","subject":"s","eventTime":"2020-01-01T00:00:00Z","data":{}}"#;
        let env: GridEnvelope = serde_json::from_str(raw).unwrap();

        let event = WireEvent::Grid(env).into_canonical(raw);
        assert_eq!(event.id(), "1");
        assert_eq!(event.event_type(), "t");
        assert_eq!(event.subject(), "s");
        assert_eq!(event.timestamp(), "2020-01-01T00:00:00Z");
        assert_eq!(event.raw_payload(), raw);
    }

    #[test]
    fn test_grid_timestamp_keeps_offset() {
        let raw = r#"{"id":"1","eventType":"t","subject":"s","eventTime":"2020-01-01T08:30:00+02:00"}"#;
        let env: GridEnvelope = serde_json::from_str(raw).unwrap();

        let event = WireEvent::Grid(env).into_canonical(raw);
        assert_eq!(event.timestamp(), "2020-01-01T08:30:00+02:00");
    }

    #[test]
    fn test_cloud_into_canonical_keeps_time_verbatim() {
        let raw = r#"{"specversion":"1.0","id":"9","type":"demo.created","subject":"x","time":"2021-06-01T12:00:00.123Z"}"#;
        let env: CloudEnvelope = serde_json::from_str(raw).unwrap();

        let event = WireEvent::Cloud(env).into_canonical(raw);
        assert_eq!(
            event.arguments(),
            ["9", "demo.created", "x", "2021-06-01T12:00:00.123Z", raw]
        );
    }

    #[test]
    fn test_canonical_data_access() {
        let event = CanonicalEvent::new(
            "1",
            "t",
            "s",
            "now",
            r#"{"data":{"target":{"repository":"naas-core"}}}"#,
        );
        assert_eq!(event.data().unwrap()["target"]["repository"], "naas-core");

        let no_data = CanonicalEvent::new("1", "t", "s", "now", "not json");
        assert!(no_data.data().is_none());
    }
}
