//! Metrics aggregation engine.
//!
//! Owns the per-resource invocation counters, the environment-level ad-hoc
//! data points, and the flush/report cycle. The control loop and the
//! telemetry listener call in concurrently; counter increments never hold
//! the map lock and read-and-reset is an atomic swap, so flushing one
//! resource cannot block increments to another.

use crate::config::Config;
use crate::resource::{
    Arn, ArnError, DIM_ACCOUNT_ID, DIM_ARN, DIM_AWS_UNIQUE_ID, DIM_FUNCTION_NAME,
    DIM_FUNCTION_VERSION, DIM_QUALIFIER, DIM_REGION, DIM_RUNTIME, DIM_SHUTDOWN_CAUSE, Dimensions,
    unique_id,
};
use crate::shutdown::ShutdownCondition;
use crate::sink::{Datapoint, DatapointValue, MetricsSink, SinkError};
use crate::ticker::{Ticker, ticker_for};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const METRIC_INVOCATIONS: &str = "lambda.function.invocation";
const METRIC_ENV_START: &str = "lambda.function.initialization";
const METRIC_ENV_START_LATENCY: &str = "lambda.function.initialization.latency";
const METRIC_ENV_SHUTDOWN: &str = "lambda.function.shutdown";
const METRIC_ENV_LIFETIME: &str = "lambda.function.lifetime";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One per distinct invoked resource string. Incremented without the map
/// lock; read-and-reset by swap at flush time.
struct ResourceCounter {
    count: Arc<AtomicI64>,
    dimensions: Dimensions,
}

/// Environment-level timestamps and the queue of one-shot data points.
#[derive(Default)]
struct EnvironmentMetrics {
    start_time: Option<Instant>,
    first_invocation: Option<Instant>,
    end_time: Option<Instant>,
    adhoc: Vec<Datapoint>,
}

impl EnvironmentMetrics {
    fn mark_start(&mut self) {
        self.start_time = Some(Instant::now());
        self.adhoc.push(Datapoint {
            metric: METRIC_ENV_START.to_string(),
            dimensions: Dimensions::new(),
            value: DatapointValue::Counter(1),
        });
    }

    fn mark_first_invocation(&mut self) {
        self.first_invocation = Some(Instant::now());

        if let (Some(start), Some(first)) = (self.start_time, self.first_invocation) {
            let latency = first.duration_since(start).as_millis() as i64;
            self.adhoc.push(Datapoint {
                metric: METRIC_ENV_START_LATENCY.to_string(),
                dimensions: Dimensions::new(),
                value: DatapointValue::UpDown(latency),
            });
        }
    }

    fn mark_end(&mut self, cause: &str) {
        self.end_time = Some(Instant::now());

        let mut dimensions = Dimensions::new();
        dimensions.insert(DIM_SHUTDOWN_CAUSE.to_string(), cause.to_string());
        self.adhoc.push(Datapoint {
            metric: METRIC_ENV_SHUTDOWN.to_string(),
            dimensions,
            value: DatapointValue::Counter(1),
        });

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            let lifetime = end.duration_since(start).as_millis() as i64;
            self.adhoc.push(Datapoint {
                metric: METRIC_ENV_LIFETIME.to_string(),
                dimensions: Dimensions::new(),
                value: DatapointValue::UpDown(lifetime),
            });
        }
    }

    fn drain(&mut self) -> Vec<Datapoint> {
        std::mem::take(&mut self.adhoc)
    }
}

/// Batches invocation counts and environment events, attaches dimensions,
/// and flushes on the ticker's cadence.
pub struct MetricEmitter {
    sink: Arc<dyn MetricsSink>,
    reporting_timeout: Duration,
    execution_env: String,
    function: Mutex<(String, String)>,
    started: AtomicBool,
    counters: Mutex<HashMap<String, ResourceCounter>>,
    default_dimensions: Mutex<Dimensions>,
    environment: Mutex<EnvironmentMetrics>,
    ticker: Mutex<Box<dyn Ticker>>,
}

impl MetricEmitter {
    /// Creates the emitter and marks the environment start.
    pub fn new(config: &Config, sink: Arc<dyn MetricsSink>) -> Self {
        Self::with_ticker(config, sink, ticker_for(config))
    }

    pub(crate) fn with_ticker(
        config: &Config,
        sink: Arc<dyn MetricsSink>,
        ticker: Box<dyn Ticker>,
    ) -> Self {
        let mut environment = EnvironmentMetrics::default();
        environment.mark_start();

        Self {
            sink,
            reporting_timeout: config.ingest.timeout,
            execution_env: config.execution_env.clone(),
            function: Mutex::new((String::new(), String::new())),
            started: AtomicBool::new(false),
            counters: Mutex::new(HashMap::new()),
            default_dimensions: Mutex::new(Dimensions::new()),
            environment: Mutex::new(environment),
            ticker: Mutex::new(ticker),
        }
    }

    /// Records the function identity from the registration response.
    /// Must be called before the first invocation is processed.
    pub fn set_function(&self, name: &str, version: &str) {
        *lock(&self.function) = (name.to_string(), version.to_string());
    }

    /// Counts one invocation of `function_arn` and flushes when due.
    ///
    /// On the first invocation ever seen, derives the default dimensions
    /// (explicitly without the qualifier) and marks the first-invocation
    /// time. A failed flush is terminal only under `fail_fast`.
    pub async fn invoked(
        &self,
        function_arn: &str,
        fail_fast: bool,
    ) -> Result<(), ShutdownCondition> {
        let counter = self.counter_for(function_arn)?;
        counter.fetch_add(1, Ordering::Relaxed);

        if !self.started.swap(true, Ordering::SeqCst) {
            let arn = Arn::parse(function_arn).map_err(internal_condition)?;
            let mut dimensions = self.dimensions_for(&arn)?;
            // Environment metrics describe the sandbox, not an alias.
            dimensions.remove(DIM_QUALIFIER);
            *lock(&self.default_dimensions) = dimensions;
            lock(&self.environment).mark_first_invocation();
        }

        let due = lock(&self.ticker).tick();
        if !due {
            return Ok(());
        }

        tracing::debug!("sending metrics");
        match self.flush().await {
            Ok(()) => Ok(()),
            Err(error) if fail_fast => Err(ShutdownCondition::metric(format!(
                "failed to send metrics: {error}"
            ))),
            Err(error) => {
                tracing::warn!(%error, "failed to send metrics");
                Ok(())
            }
        }
    }

    /// Records the environment end and performs one unconditional final
    /// flush, so the shutdown sample is never dropped by the ticker.
    pub async fn shutdown(&self, condition: &ShutdownCondition) {
        if !self.started.load(Ordering::SeqCst) {
            tracing::debug!("closing emitter that was never invoked");
        }

        lock(&self.environment).mark_end(condition.reason_label());

        if let Err(error) = self.flush().await {
            tracing::error!(%error, "failed to report metrics on shutdown");
        }
    }

    /// Enqueues a one-shot counter delta on the environment queue.
    pub(crate) fn record_counter(&self, name: &str, dimensions: Dimensions, value: i64) {
        lock(&self.environment).adhoc.push(Datapoint {
            metric: name.to_string(),
            dimensions,
            value: DatapointValue::Counter(value),
        });
    }

    /// Enqueues a one-shot additive delta on the environment queue.
    pub(crate) fn record_up_down(&self, name: &str, dimensions: Dimensions, delta: i64) {
        lock(&self.environment).adhoc.push(Datapoint {
            metric: name.to_string(),
            dimensions,
            value: DatapointValue::UpDown(delta),
        });
    }

    /// Enqueues one distribution sample on the environment queue.
    pub(crate) fn record_histogram(&self, name: &str, dimensions: Dimensions, value: f64) {
        lock(&self.environment).adhoc.push(Datapoint {
            metric: name.to_string(),
            dimensions,
            value: DatapointValue::Sample(value),
        });
    }

    /// Collects due counters and queued ad-hoc points, hands them to the
    /// sink and reports. The sink preserves handed-off points across a
    /// failed report.
    pub(crate) async fn flush(&self) -> Result<(), SinkError> {
        let default_dimensions = lock(&self.default_dimensions).clone();

        {
            let counters = lock(&self.counters);
            for entry in counters.values() {
                let count = entry.count.swap(0, Ordering::Relaxed);
                if count == 0 {
                    continue;
                }
                let mut dimensions = default_dimensions.clone();
                dimensions.extend(entry.dimensions.clone());
                self.sink.counter(METRIC_INVOCATIONS, dimensions, count);
            }
        }

        let adhoc = lock(&self.environment).drain();
        for point in adhoc {
            let mut dimensions = default_dimensions.clone();
            dimensions.extend(point.dimensions);
            match point.value {
                DatapointValue::Counter(value) => {
                    self.sink.counter(&point.metric, dimensions, value);
                }
                DatapointValue::UpDown(delta) => {
                    self.sink.up_down(&point.metric, dimensions, delta);
                }
                DatapointValue::Sample(value) => {
                    self.sink.histogram(&point.metric, dimensions, value);
                }
            }
        }

        self.sink.report(self.reporting_timeout).await
    }

    /// Returns the counter for `function_arn`, registering it (with its
    /// grouped dimensions) on first sighting.
    fn counter_for(&self, function_arn: &str) -> Result<Arc<AtomicI64>, ShutdownCondition> {
        let mut counters = lock(&self.counters);

        if let Some(entry) = counters.get(function_arn) {
            return Ok(Arc::clone(&entry.count));
        }

        let arn = Arn::parse(function_arn).map_err(internal_condition)?;
        let dimensions = self.dimensions_for(&arn)?;
        let count = Arc::new(AtomicI64::new(0));

        counters.insert(
            function_arn.to_string(),
            ResourceCounter {
                count: Arc::clone(&count),
                dimensions,
            },
        );

        Ok(count)
    }

    fn dimensions_for(&self, arn: &Arn) -> Result<Dimensions, ShutdownCondition> {
        let resource = arn.function_resource().map_err(internal_condition)?;
        let (name, version) = lock(&self.function).clone();

        let mut dimensions = Dimensions::new();
        dimensions.insert(DIM_REGION.to_string(), arn.region.clone());
        dimensions.insert(DIM_ACCOUNT_ID.to_string(), arn.account_id.clone());
        dimensions.insert(DIM_FUNCTION_NAME.to_string(), name.clone());
        dimensions.insert(DIM_FUNCTION_VERSION.to_string(), version.clone());
        dimensions.insert(DIM_QUALIFIER.to_string(), resource.qualifier);
        dimensions.insert(
            DIM_ARN.to_string(),
            arn.with_qualifier(&version).map_err(internal_condition)?,
        );
        if !self.execution_env.is_empty() {
            dimensions.insert(DIM_RUNTIME.to_string(), self.execution_env.clone());
        }
        dimensions.insert(
            DIM_AWS_UNIQUE_ID.to_string(),
            unique_id(&name, &version, &arn.region, &arn.account_id),
        );

        Ok(dimensions)
    }
}

fn internal_condition(error: ArnError) -> ShutdownCondition {
    ShutdownCondition::internal(format!("can't parse function ARN: {error}"))
}
