//! Runtime orchestration: wiring, the control loop and teardown ordering.
//!
//! The loop blocks on the control plane's next-event long poll and ends on
//! the first [`ShutdownCondition`]. This module is the sole place that
//! decides whether a condition is reported back to the control plane, and
//! the sole producer of the internal error classification: a panic inside
//! the spawned loop surfaces as a join error and is reported as an
//! internal error regardless of its root cause.

use crate::config::Config;
use crate::exporter::DatapointSink;
use crate::extension::{Event, ExtensionClient, RegisteredExtension};
use crate::metrics::MetricEmitter;
use crate::recorder::MetricsRecorder;
use crate::shutdown::ShutdownCondition;
use crate::subscriber::TelemetrySubscriber;
use std::sync::Arc;

/// Owns the main control loop and the wiring of all components.
pub struct ExtensionRuntime {
    config: Config,
}

impl ExtensionRuntime {
    /// Creates a runtime with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Registers, runs the control loop until a terminal condition, then
    /// tears everything down in order: telemetry listener, final metrics
    /// flush, error report.
    pub async fn run(self) -> ShutdownCondition {
        let client = match ExtensionClient::new(&self.config) {
            Ok(client) => client,
            Err(condition) => return condition,
        };

        // A failed registration leaves nothing to report to: there is no
        // session identifier yet.
        let api = match client.register(&self.config.name).await {
            Ok(api) => api,
            Err(condition) => return condition,
        };

        let sink = match DatapointSink::new(&self.config.ingest) {
            Ok(sink) => Arc::new(sink),
            Err(error) => {
                let condition =
                    ShutdownCondition::internal(format!("can't create ingest sink: {error}"));
                api.report_init_error(condition.reason_label()).await;
                return condition;
            }
        };

        let emitter = Arc::new(MetricEmitter::new(&self.config, sink));
        emitter.set_function(&api.function_name, &api.function_version);

        let mut subscriber = None;
        if self.config.telemetry.enabled {
            let recorder = Arc::new(MetricsRecorder::new(Arc::clone(&emitter)));
            let mut candidate =
                TelemetrySubscriber::new(&self.config, api.extension_id(), recorder);
            match candidate.start().await {
                Ok(()) => subscriber = Some(candidate),
                Err(error) => {
                    // Enriched telemetry is an upgrade, not a requirement.
                    tracing::warn!(%error, "telemetry subscription failed, continuing without it");
                }
            }
        }

        let api = Arc::new(api);
        let fail_fast = self.config.reporting.fail_fast;
        let loop_task = tokio::spawn(poll_loop(
            Arc::clone(&api),
            Arc::clone(&emitter),
            fail_fast,
        ));

        let condition = match loop_task.await {
            Ok(condition) => condition,
            Err(join_error) => ShutdownCondition::internal(format!(
                "control loop terminated abnormally: {join_error}"
            )),
        };

        if let Some(mut subscriber) = subscriber {
            subscriber.shutdown(self.config.ingest.timeout).await;
        }

        emitter.shutdown(&condition).await;

        if condition.is_error() {
            api.report_exit_error(condition.reason_label()).await;
        }

        condition
    }
}

async fn poll_loop(
    api: Arc<RegisteredExtension>,
    emitter: Arc<MetricEmitter>,
    fail_fast: bool,
) -> ShutdownCondition {
    loop {
        let event = match api.next_event().await {
            Ok(event) => event,
            Err(condition) => return condition,
        };

        match event {
            Event::Invoke {
                invoked_function_arn,
                request_id,
                ..
            } => {
                tracing::debug!(%request_id, "invocation event");
                if let Err(condition) = emitter.invoked(&invoked_function_arn, fail_fast).await {
                    return condition;
                }
            }
            Event::Shutdown { shutdown_reason } => {
                tracing::info!(%shutdown_reason, "shutdown event");
                return ShutdownCondition::host(shutdown_reason);
            }
        }
    }
}
