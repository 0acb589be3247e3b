//! Metrics sink contract and datapoint model.
//!
//! The sink exposes the additive instrument surface of the backend:
//! counters and up-down counters take deltas, histograms take samples,
//! and `report` performs one bounded batch hand-off. Implementations must
//! be callable concurrently from the control loop and the telemetry
//! listener.

use crate::resource::Dimensions;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// A single metric sample bound for the time-series backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    /// Metric name.
    pub metric: String,
    /// Labels attached to this sample.
    pub dimensions: Dimensions,
    /// Sample value and instrument kind.
    pub value: DatapointValue,
}

/// Value of a datapoint, by instrument kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DatapointValue {
    /// Additive monotonic delta.
    Counter(i64),
    /// Additive bidirectional delta (gauge emulation target).
    UpDown(i64),
    /// Distribution sample.
    Sample(f64),
}

/// Error delivering a batch to the backend.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SinkError {
    /// HTTP request failed.
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Backend returned an error status.
    #[error("ingest returned {status}: {body}")]
    Status {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Response body from the backend.
        body: String,
    },
}

/// Backend adapter contract consumed by the aggregation engine.
pub trait MetricsSink: Send + Sync {
    /// Applies a monotonic counter delta.
    fn counter(&self, name: &str, dimensions: Dimensions, value: i64);

    /// Applies a bidirectional additive delta.
    fn up_down(&self, name: &str, dimensions: Dimensions, delta: i64);

    /// Records one distribution sample.
    fn histogram(&self, name: &str, dimensions: Dimensions, value: f64);

    /// Delivers everything applied since the last successful report, in
    /// one batch, within the given timeout.
    fn report<'a>(
        &'a self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;
}
