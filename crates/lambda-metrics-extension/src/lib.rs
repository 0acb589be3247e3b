//! Lambda extension that converts the host's lifecycle and telemetry
//! events into metrics for a time-series ingest backend.
//!
//! The extension registers with the Extensions API, long-polls for
//! lifecycle events, counts invocations per invoked resource, subscribes
//! to the Telemetry API for enriched platform events, and delivers
//! everything as datapoint batches on a freeze-aware cadence.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod exporter;
pub mod extension;
pub mod gauge;
pub mod metrics;
pub mod recorder;
pub mod resource;
pub mod runtime;
pub mod shutdown;
pub mod sink;
pub mod subscriber;
pub mod telemetry;
pub mod ticker;

pub use config::{BufferingConfig, Config, IngestConfig, ReportingConfig, TelemetryConfig};
pub use exporter::DatapointSink;
pub use extension::{Event, ExtensionClient, RegisteredExtension};
pub use gauge::GaugeDelta;
pub use metrics::MetricEmitter;
pub use recorder::{MetricsRecorder, TelemetrySink};
pub use resource::{Arn, ArnError, Dimensions, FunctionResource};
pub use runtime::ExtensionRuntime;
pub use shutdown::{ShutdownCondition, ShutdownReason};
pub use sink::{Datapoint, DatapointValue, MetricsSink, SinkError};
pub use subscriber::{SubscribeError, TelemetrySubscriber};
pub use telemetry::{EventKind, PlatformEvent, TelemetryError};
pub use ticker::{AlwaysTicker, LossyTicker, Ticker};
