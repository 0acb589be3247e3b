//! Converts platform telemetry events into metric updates.
//!
//! The subscriber dispatches decoded events to a [`TelemetrySink`]; the
//! [`MetricsRecorder`] implementation drives the aggregation engine's
//! ad-hoc instrument surface. Telemetry-driven series use `faas.*` names,
//! disjoint from the engine's environment metrics, so the two concurrent
//! paths never double-emit a series.

use crate::gauge::GaugeDelta;
use crate::metrics::MetricEmitter;
use crate::resource::{DIM_SHUTDOWN_CAUSE, Dimensions};
use crate::telemetry::{
    InitEndRecord, InitStartRecord, ReportRecord, RuntimeDoneRecord, ShutdownRecord, StartRecord,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

const METRIC_INVOCATIONS: &str = "faas.invocations";
const METRIC_ERRORS: &str = "faas.errors";
const METRIC_TIMEOUTS: &str = "faas.timeouts";
const METRIC_INITIALIZATIONS: &str = "faas.initializations";
const METRIC_INIT_DURATION: &str = "faas.init_duration";
const METRIC_COLD_STARTS: &str = "faas.coldstarts";
const METRIC_WARM_STARTS: &str = "faas.warmstarts";
const METRIC_LIFETIME: &str = "faas.lifetime";
const METRIC_SHUTDOWNS: &str = "faas.shutdowns";
const METRIC_DURATION: &str = "faas.duration";
const METRIC_RESPONSE_SIZE: &str = "faas.response_size";
const METRIC_MEM_USAGE: &str = "faas.mem_usage";
const METRIC_RESTORE_DURATION: &str = "faas.restore_duration";

const INIT_TYPE_SNAP_START: &str = "snap-start";

/// Per-event handler contract driven by the telemetry subscriber.
pub trait TelemetrySink: Send + Sync {
    /// `platform.initStart` was received.
    fn record_init_start(&self, time: DateTime<Utc>, record: &InitStartRecord);
    /// `platform.initEnd` was received.
    fn record_init_end(&self, time: DateTime<Utc>, record: &InitEndRecord);
    /// `platform.start` was received.
    fn record_invoke_start(&self, time: DateTime<Utc>, record: &StartRecord);
    /// `platform.runtimeDone` was received.
    fn record_runtime_done(&self, time: DateTime<Utc>, record: &RuntimeDoneRecord);
    /// `platform.report` was received.
    fn record_report(&self, time: DateTime<Utc>, record: &ReportRecord);
    /// `platform.shutdown` was received.
    fn record_shutdown(&self, time: DateTime<Utc>, record: &ShutdownRecord);
}

/// Single-environment wall-clock state.
#[derive(Debug, Default)]
struct EnvironmentState {
    init_start: Option<DateTime<Utc>>,
    // One in-flight invocation per execution environment.
    invoke_start: Option<DateTime<Utc>>,
}

/// Records telemetry-derived metrics through the aggregation engine.
pub struct MetricsRecorder {
    emitter: Arc<MetricEmitter>,
    state: Mutex<EnvironmentState>,
    lifetime: GaugeDelta,
    init_latency: GaugeDelta,
}

impl MetricsRecorder {
    /// Creates a recorder feeding the given engine.
    pub fn new(emitter: Arc<MetricEmitter>) -> Self {
        Self {
            emitter,
            state: Mutex::new(EnvironmentState::default()),
            lifetime: GaugeDelta::new(),
            init_latency: GaugeDelta::new(),
        }
    }

    fn init_start(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .init_start
    }
}

impl TelemetrySink for MetricsRecorder {
    fn record_init_start(&self, time: DateTime<Utc>, record: &InitStartRecord) {
        tracing::debug!(
            initialization_type = %record.initialization_type,
            "environment initialization started"
        );
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .init_start = Some(time);
    }

    fn record_init_end(&self, time: DateTime<Utc>, record: &InitEndRecord) {
        let Some(init_start) = self.init_start() else {
            tracing::warn!("init end received without init start, ignoring");
            return;
        };

        let duration_ms = (time - init_start).num_milliseconds();

        self.emitter
            .record_counter(METRIC_INITIALIZATIONS, Dimensions::new(), 1);

        let delta = self.init_latency.observe(duration_ms);
        if delta > 0 {
            self.emitter
                .record_up_down(METRIC_INIT_DURATION, Dimensions::new(), delta);
        }

        if record.initialization_type == INIT_TYPE_SNAP_START {
            self.emitter
                .record_counter(METRIC_WARM_STARTS, Dimensions::new(), 1);
        } else {
            self.emitter
                .record_counter(METRIC_COLD_STARTS, Dimensions::new(), 1);
        }

        tracing::debug!(
            duration_ms,
            initialization_type = %record.initialization_type,
            "environment initialization finished"
        );
    }

    fn record_invoke_start(&self, time: DateTime<Utc>, record: &StartRecord) {
        tracing::debug!(request_id = %record.request_id, "invocation started");
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invoke_start = Some(time);
    }

    fn record_runtime_done(&self, _time: DateTime<Utc>, record: &RuntimeDoneRecord) {
        self.emitter
            .record_counter(METRIC_INVOCATIONS, Dimensions::new(), 1);

        let invoke_start = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invoke_start;

        if let Some(metrics) = &record.metrics {
            if let Some(bytes) = metrics.produced_bytes {
                if bytes > 0 {
                    self.emitter.record_histogram(
                        METRIC_RESPONSE_SIZE,
                        Dimensions::new(),
                        bytes as f64,
                    );
                }
            }

            // Duration is only meaningful once a matching start was seen.
            if invoke_start.is_some() && metrics.duration_ms > 0.0 {
                self.emitter.record_histogram(
                    METRIC_DURATION,
                    Dimensions::new(),
                    metrics.duration_ms,
                );
            }
        }

        match record.status.as_str() {
            "error" | "failure" => {
                self.emitter
                    .record_counter(METRIC_ERRORS, Dimensions::new(), 1);
            }
            "timeout" => {
                self.emitter
                    .record_counter(METRIC_TIMEOUTS, Dimensions::new(), 1);
            }
            _ => {}
        }

        tracing::debug!(
            request_id = %record.request_id,
            status = %record.status,
            "invocation finished"
        );
    }

    fn record_report(&self, time: DateTime<Utc>, record: &ReportRecord) {
        if let Some(init_start) = self.init_start() {
            let lifetime_ms = (time - init_start).num_milliseconds();
            let delta = self.lifetime.observe(lifetime_ms);
            if delta > 0 {
                self.emitter
                    .record_up_down(METRIC_LIFETIME, Dimensions::new(), delta);
            }
        }

        if record.metrics.max_memory_used_mb > 0 {
            let bytes = (record.metrics.max_memory_used_mb * 1024 * 1024) as f64;
            self.emitter
                .record_histogram(METRIC_MEM_USAGE, Dimensions::new(), bytes);
        }

        if let Some(restore_ms) = record.metrics.restore_duration_ms {
            if restore_ms > 0.0 {
                self.emitter
                    .record_histogram(METRIC_RESTORE_DURATION, Dimensions::new(), restore_ms);
            }
        }
    }

    fn record_shutdown(&self, _time: DateTime<Utc>, record: &ShutdownRecord) {
        let mut dimensions = Dimensions::new();
        dimensions.insert(
            DIM_SHUTDOWN_CAUSE.to_string(),
            record.shutdown_reason.clone(),
        );
        self.emitter.record_counter(METRIC_SHUTDOWNS, dimensions, 1);
    }
}
