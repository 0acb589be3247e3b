//! HTTP datapoint sink for the ingest backend.
//!
//! Datapoints accumulate in a pending buffer and are shipped as one JSON
//! batch per report call. On delivery failure the buffer is retained so
//! already-collected points ride the next flush; there is no internal
//! retry loop — the host's invoke/shutdown cadence is the retry cadence.

use crate::config::IngestConfig;
use crate::resource::Dimensions;
use crate::sink::{Datapoint, DatapointValue, MetricsSink, SinkError};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const DATAPOINT_PATH: &str = "/v2/datapoint";
const TOKEN_HEADER: &str = "X-SF-Token";

/// Buffering datapoint sink delivering to an HTTP ingest endpoint.
pub struct DatapointSink {
    endpoint: Option<String>,
    token: String,
    client: Client,
    pending: Mutex<Vec<Datapoint>>,
}

impl DatapointSink {
    /// Creates a sink for the configured ingest backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &IngestConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(SinkError::Http)?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            client,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Returns whether an ingest endpoint is configured.
    pub fn has_endpoint(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Number of datapoints awaiting delivery.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn push(&self, point: Datapoint) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(point);
    }

    fn take_pending(&self) -> Vec<Datapoint> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn restore_pending(&self, batch: Vec<Datapoint>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let newer = std::mem::replace(&mut *pending, batch);
        pending.extend(newer);
    }

    async fn deliver(&self, batch: &[Datapoint], timeout: Duration) -> Result<(), SinkError> {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint,
            None => {
                tracing::debug!(
                    points = batch.len(),
                    "no ingest endpoint configured, dropping batch"
                );
                return Ok(());
            }
        };

        let url = format!("{endpoint}{DATAPOINT_PATH}");
        let body = WireBody::from_batch(batch);

        let response = self
            .client
            .post(&url)
            .header(TOKEN_HEADER, &self.token)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(SinkError::Http)?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(points = batch.len(), "datapoint batch delivered");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SinkError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl MetricsSink for DatapointSink {
    fn counter(&self, name: &str, dimensions: Dimensions, value: i64) {
        self.push(Datapoint {
            metric: name.to_string(),
            dimensions,
            value: DatapointValue::Counter(value),
        });
    }

    fn up_down(&self, name: &str, dimensions: Dimensions, delta: i64) {
        self.push(Datapoint {
            metric: name.to_string(),
            dimensions,
            value: DatapointValue::UpDown(delta),
        });
    }

    fn histogram(&self, name: &str, dimensions: Dimensions, value: f64) {
        self.push(Datapoint {
            metric: name.to_string(),
            dimensions,
            value: DatapointValue::Sample(value),
        });
    }

    fn report<'a>(
        &'a self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let batch = self.take_pending();
            if batch.is_empty() {
                return Ok(());
            }

            match self.deliver(&batch, timeout).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    // Keep collected points for the next attempt.
                    self.restore_pending(batch);
                    Err(error)
                }
            }
        })
    }
}

/// Wire shape of one datapoint batch: instrument kind → samples.
#[derive(Debug, Serialize)]
struct WireBody<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    counter: Vec<WirePoint<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gauge: Vec<WirePoint<'a>>,
}

#[derive(Debug, Serialize)]
struct WirePoint<'a> {
    metric: &'a str,
    #[serde(skip_serializing_if = "Dimensions::is_empty")]
    dimensions: &'a Dimensions,
    value: WireValue,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireValue {
    Int(i64),
    Float(f64),
}

impl<'a> WireBody<'a> {
    fn from_batch(batch: &'a [Datapoint]) -> Self {
        let mut counter = Vec::new();
        let mut gauge = Vec::new();

        for point in batch {
            match point.value {
                DatapointValue::Counter(value) => counter.push(WirePoint {
                    metric: &point.metric,
                    dimensions: &point.dimensions,
                    value: WireValue::Int(value),
                }),
                // The wire format has no dedicated up-down or distribution
                // type; both are carried as gauge samples.
                DatapointValue::UpDown(value) => gauge.push(WirePoint {
                    metric: &point.metric,
                    dimensions: &point.dimensions,
                    value: WireValue::Int(value),
                }),
                DatapointValue::Sample(value) => gauge.push(WirePoint {
                    metric: &point.metric,
                    dimensions: &point.dimensions,
                    value: WireValue::Float(value),
                }),
            }
        }

        Self { counter, gauge }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sink(endpoint: Option<&str>) -> DatapointSink {
        let config = IngestConfig {
            endpoint: endpoint.map(String::from),
            token: "abcdefghijklmnop".to_string(),
            timeout: Duration::from_millis(250),
        };
        DatapointSink::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_report_without_endpoint_drops_batch() {
        let sink = test_sink(None);
        assert!(!sink.has_endpoint());

        sink.counter("function.invocation", Dimensions::new(), 3);
        assert_eq!(sink.pending_count(), 1);

        sink.report(Duration::from_millis(250)).await.unwrap();
        assert_eq!(sink.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_report_is_noop() {
        let sink = test_sink(None);
        sink.report(Duration::from_millis(250)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_report_preserves_pending() {
        // Nothing listens on this port; delivery fails fast.
        let sink = test_sink(Some("http://127.0.0.1:9"));
        sink.counter("a", Dimensions::new(), 1);
        sink.up_down("b", Dimensions::new(), 2);

        let result = sink.report(Duration::from_millis(250)).await;
        assert!(result.is_err());
        assert_eq!(sink.pending_count(), 2);

        // Points collected after the failure are kept behind the retained
        // batch, preserving delivery order.
        sink.counter("c", Dimensions::new(), 3);
        let pending = sink.take_pending();
        let metrics: Vec<_> = pending.iter().map(|p| p.metric.as_str()).collect();
        assert_eq!(metrics, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_wire_body_shape() {
        let mut dims = Dimensions::new();
        dims.insert("aws_region".to_string(), "us-east-1".to_string());

        let batch = vec![
            Datapoint {
                metric: "function.invocation".to_string(),
                dimensions: dims,
                value: DatapointValue::Counter(4),
            },
            Datapoint {
                metric: "function.lifetime".to_string(),
                dimensions: Dimensions::new(),
                value: DatapointValue::UpDown(1500),
            },
            Datapoint {
                metric: "faas.response_size".to_string(),
                dimensions: Dimensions::new(),
                value: DatapointValue::Sample(2048.0),
            },
        ];

        let body = serde_json::to_value(WireBody::from_batch(&batch)).unwrap();

        assert_eq!(body["counter"][0]["metric"], "function.invocation");
        assert_eq!(body["counter"][0]["value"], 4);
        assert_eq!(body["counter"][0]["dimensions"]["aws_region"], "us-east-1");
        assert_eq!(body["gauge"][0]["metric"], "function.lifetime");
        assert_eq!(body["gauge"][0]["value"], 1500);
        assert_eq!(body["gauge"][1]["value"], 2048.0);
    }

    #[test]
    fn test_sink_error_display() {
        let error = SinkError::Status {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(format!("{}", error).contains("503"));
    }
}
