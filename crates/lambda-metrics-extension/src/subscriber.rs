//! Telemetry API subscription and push listener.
//!
//! Binds a local HTTP listener, then performs the one-time subscription
//! handshake declaring buffering limits and the callback destination. The
//! host pushes batches of platform events to the listener; batches that
//! fail to decode are still answered 200 — a malformed-but-received batch
//! must never cause redelivery or be attributed to extension health.

use crate::config::{BufferingConfig, Config};
use crate::extension::EXTENSION_ID_HEADER;
use crate::recorder::TelemetrySink;
use crate::telemetry::{self, PlatformEvent};
use axum::{
    Router, body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SCHEMA_VERSION: &str = "2022-12-13";
const TELEMETRY_API_VERSION: &str = "2022-07-01";
// The host mandates this hostname in the subscription destination.
const SUBSCRIPTION_HOST: &str = "sandbox.localdomain";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Error starting the telemetry subscription.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// Could not bind or serve the local listener.
    #[error("failed to bind telemetry listener")]
    Bind(#[from] std::io::Error),

    /// The handshake request could not be sent.
    #[error("subscription request failed")]
    Http(#[from] reqwest::Error),

    /// The host rejected the subscription.
    #[error("subscription rejected with {status}: {body}")]
    Rejected {
        /// HTTP status returned by the host.
        status: u16,
        /// Response body returned by the host.
        body: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    schema_version: &'static str,
    types: Vec<&'static str>,
    buffering: WireBuffering,
    destination: WireDestination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBuffering {
    max_items: u32,
    max_bytes: u32,
    timeout_ms: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDestination {
    protocol: &'static str,
    #[serde(rename = "URI")]
    uri: String,
}

/// Receives host-pushed platform event batches and feeds a
/// [`TelemetrySink`].
pub struct TelemetrySubscriber {
    runtime_api: String,
    port: u16,
    buffering: BufferingConfig,
    extension_id: String,
    sink: Arc<dyn TelemetrySink>,
    cancel: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl TelemetrySubscriber {
    /// Creates a subscriber for the registered session.
    pub fn new(
        config: &Config,
        extension_id: impl Into<String>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            runtime_api: config.runtime_api.clone(),
            port: config.telemetry.port,
            buffering: config.telemetry.buffering.clone(),
            extension_id: extension_id.into(),
            sink,
            cancel: CancellationToken::new(),
            server: None,
        }
    }

    /// Binds the listener, starts serving, then subscribes.
    ///
    /// # Errors
    ///
    /// On a failed handshake the listener is torn down and the error
    /// returned; the caller decides whether that is fatal.
    pub async fn start(&mut self) -> Result<(), SubscribeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;

        let app = router(Arc::clone(&self.sink));
        let cancel = self.cancel.clone();
        self.server = Some(tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                tracing::error!(%error, "telemetry listener failed");
            }
        }));

        tracing::info!(port = self.port, "telemetry listener started");

        if let Err(error) = self.subscribe().await {
            self.cancel.cancel();
            return Err(error);
        }

        tracing::info!("subscribed to the telemetry API");
        Ok(())
    }

    /// Stops accepting connections, lets in-flight handlers finish and
    /// unbinds the listener. Idempotent.
    pub async fn shutdown(&mut self, timeout: Duration) {
        self.cancel.cancel();

        if let Some(server) = self.server.take() {
            if tokio::time::timeout(timeout, server).await.is_err() {
                tracing::warn!("telemetry listener did not stop in time");
            }
        }
    }

    async fn subscribe(&self) -> Result<(), SubscribeError> {
        let request = SubscriptionRequest {
            schema_version: SCHEMA_VERSION,
            types: vec!["platform"],
            buffering: WireBuffering {
                max_items: self.buffering.max_items,
                max_bytes: self.buffering.max_bytes,
                timeout_ms: self.buffering.timeout_ms,
            },
            destination: WireDestination {
                protocol: "HTTP",
                uri: format!("http://{SUBSCRIPTION_HOST}:{}", self.port),
            },
        };

        let url = format!(
            "http://{}/{TELEMETRY_API_VERSION}/telemetry",
            self.runtime_api
        );

        let client = reqwest::Client::builder()
            .timeout(HANDSHAKE_TIMEOUT)
            .build()?;

        let response = client
            .put(&url)
            .header(EXTENSION_ID_HEADER, &self.extension_id)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SubscribeError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn router(sink: Arc<dyn TelemetrySink>) -> Router {
    Router::new().route("/", post(handle_batch)).with_state(sink)
}

async fn handle_batch(
    State(sink): State<Arc<dyn TelemetrySink>>,
    body: Bytes,
) -> impl IntoResponse {
    let events = match telemetry::parse_batch(&body) {
        Ok(events) => events,
        Err(error) => {
            tracing::warn!(%error, "discarding malformed telemetry batch");
            return StatusCode::OK;
        }
    };

    tracing::debug!(count = events.len(), "received telemetry events");

    for event in events {
        dispatch(sink.as_ref(), event);
    }

    StatusCode::OK
}

fn dispatch(sink: &dyn TelemetrySink, event: PlatformEvent) {
    match event {
        PlatformEvent::InitStart { time, record } => sink.record_init_start(time, &record),
        PlatformEvent::InitEnd { time, record } => sink.record_init_end(time, &record),
        PlatformEvent::InvokeStart { time, record } => sink.record_invoke_start(time, &record),
        PlatformEvent::RuntimeDone { time, record } => sink.record_runtime_done(time, &record),
        PlatformEvent::Report { time, record } => sink.record_report(time, &record),
        PlatformEvent::Shutdown { time, record } => sink.record_shutdown(time, &record),
    }
}
