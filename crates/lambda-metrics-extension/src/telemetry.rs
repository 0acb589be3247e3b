//! Telemetry API event model.
//!
//! Platform events arrive as a JSON array of `{time, type, record}`
//! objects. The host sometimes delivers `record` as a string containing
//! escaped JSON rather than a native object; decoding tries the object
//! form first and falls back to string-then-reparse, failing only when
//! both fail. Unknown event types are ignored for forward compatibility.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// The fixed enumeration of telemetry event types.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EventKind {
    /// Environment initialization started.
    #[serde(rename = "platform.initStart")]
    InitStart,
    /// Environment initialization completed.
    #[serde(rename = "platform.initEnd")]
    InitEnd,
    /// An invocation started.
    #[serde(rename = "platform.start")]
    Start,
    /// The runtime finished an invocation.
    #[serde(rename = "platform.runtimeDone")]
    RuntimeDone,
    /// Post-invocation platform report.
    #[serde(rename = "platform.report")]
    Report,
    /// The environment is shutting down.
    #[serde(rename = "platform.shutdown")]
    Shutdown,
    /// Any other event type, ignored.
    #[serde(other)]
    Other,
}

/// Wire shape of one event before its record is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTelemetryEvent {
    /// Event time.
    pub time: DateTime<Utc>,
    /// Event type tag.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Event-specific payload, object or string-encoded JSON.
    #[serde(default)]
    pub record: serde_json::Value,
}

/// A fully decoded platform event.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// `platform.initStart`
    InitStart {
        /// Event time.
        time: DateTime<Utc>,
        /// Decoded record.
        record: InitStartRecord,
    },
    /// `platform.initEnd`
    InitEnd {
        /// Event time.
        time: DateTime<Utc>,
        /// Decoded record.
        record: InitEndRecord,
    },
    /// `platform.start`
    InvokeStart {
        /// Event time.
        time: DateTime<Utc>,
        /// Decoded record.
        record: StartRecord,
    },
    /// `platform.runtimeDone`
    RuntimeDone {
        /// Event time.
        time: DateTime<Utc>,
        /// Decoded record.
        record: RuntimeDoneRecord,
    },
    /// `platform.report`
    Report {
        /// Event time.
        time: DateTime<Utc>,
        /// Decoded record.
        record: ReportRecord,
    },
    /// `platform.shutdown`
    Shutdown {
        /// Event time.
        time: DateTime<Utc>,
        /// Decoded record.
        record: ShutdownRecord,
    },
}

/// Record for `platform.initStart`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitStartRecord {
    /// `on-demand` for cold starts, `snap-start` for restored
    /// environments.
    #[serde(default)]
    pub initialization_type: String,
    /// Initialization phase.
    #[serde(default)]
    pub phase: String,
    /// Runtime version, when reported.
    #[serde(default)]
    pub runtime_version: Option<String>,
}

/// Record for `platform.initEnd`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEndRecord {
    /// Initialization type, as on init-start.
    #[serde(default)]
    pub initialization_type: String,
    /// Initialization phase.
    #[serde(default)]
    pub phase: String,
    /// Initialization status, when reported.
    #[serde(default)]
    pub status: Option<String>,
}

/// Record for `platform.start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecord {
    /// Request id of the invocation.
    pub request_id: String,
    /// Invoked function version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Record for `platform.runtimeDone`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDoneRecord {
    /// Request id of the invocation.
    pub request_id: String,
    /// Outcome: `success`, `error`/`failure` or `timeout`.
    pub status: String,
    /// Invocation metrics, when reported.
    #[serde(default)]
    pub metrics: Option<RuntimeDoneMetrics>,
}

/// Metrics carried by `platform.runtimeDone`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDoneMetrics {
    /// Invocation duration in milliseconds.
    pub duration_ms: f64,
    /// Response payload size in bytes.
    #[serde(default)]
    pub produced_bytes: Option<u64>,
}

/// Record for `platform.report`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    /// Request id of the invocation.
    pub request_id: String,
    /// Invocation outcome.
    #[serde(default)]
    pub status: Option<String>,
    /// Detailed invocation metrics.
    pub metrics: ReportMetrics,
}

/// Metrics carried by `platform.report`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    /// Invocation duration in milliseconds.
    pub duration_ms: f64,
    /// Billed duration in milliseconds.
    #[serde(default)]
    pub billed_duration_ms: u64,
    /// Configured memory in MB.
    #[serde(default, rename = "memorySizeMB")]
    pub memory_size_mb: u64,
    /// Peak memory used in MB.
    #[serde(default, rename = "maxMemoryUsedMB")]
    pub max_memory_used_mb: u64,
    /// Cold-start initialization duration, when present.
    #[serde(default)]
    pub init_duration_ms: Option<f64>,
    /// Snapshot-restore duration, when present.
    #[serde(default)]
    pub restore_duration_ms: Option<f64>,
}

/// Record for `platform.shutdown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownRecord {
    /// Host-supplied shutdown reason.
    #[serde(default)]
    pub shutdown_reason: String,
}

/// Failure to decode a telemetry payload.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The request body is not a JSON array of events.
    #[error("malformed event batch")]
    Batch(#[source] serde_json::Error),
}

/// Decodes an inbound batch into platform events.
///
/// Events whose record cannot be decoded are logged and skipped; event
/// types outside the known enumeration are silently ignored.
///
/// # Errors
///
/// Returns an error only when the body is not a JSON array of events.
pub fn parse_batch(body: &[u8]) -> Result<Vec<PlatformEvent>, TelemetryError> {
    let raw: Vec<RawTelemetryEvent> =
        serde_json::from_slice(body).map_err(TelemetryError::Batch)?;

    let mut events = Vec::with_capacity(raw.len());
    for event in raw {
        let kind = event.kind;
        match convert(event) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(?kind, %error, "skipping undecodable event record");
            }
        }
    }
    Ok(events)
}

fn convert(raw: RawTelemetryEvent) -> Result<Option<PlatformEvent>, serde_json::Error> {
    let time = raw.time;
    let event = match raw.kind {
        EventKind::InitStart => PlatformEvent::InitStart {
            time,
            record: decode_record(&raw.record)?,
        },
        EventKind::InitEnd => PlatformEvent::InitEnd {
            time,
            record: decode_record(&raw.record)?,
        },
        EventKind::Start => PlatformEvent::InvokeStart {
            time,
            record: decode_record(&raw.record)?,
        },
        EventKind::RuntimeDone => PlatformEvent::RuntimeDone {
            time,
            record: decode_record(&raw.record)?,
        },
        EventKind::Report => PlatformEvent::Report {
            time,
            record: decode_record(&raw.record)?,
        },
        EventKind::Shutdown => PlatformEvent::Shutdown {
            time,
            record: decode_record(&raw.record)?,
        },
        EventKind::Other => return Ok(None),
    };
    Ok(Some(event))
}

/// Decodes a record that may be a native object or a string containing
/// escaped JSON. The object form wins; the fallback error surfaces only
/// when both decodings fail.
fn decode_record<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, serde_json::Error> {
    match serde_json::from_value(value.clone()) {
        Ok(record) => Ok(record),
        Err(object_error) => match value.as_str() {
            Some(text) => serde_json::from_str(text),
            None => Err(object_error),
        },
    }
}
