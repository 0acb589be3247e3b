//! Configuration loading and management.
//!
//! Layered configuration using figment. Sources, later overriding earlier:
//! 1. Compiled-in defaults
//! 2. Config file: `/var/task/metrics-extension.toml` (optional)
//! 3. Well-known flat environment variables (`METRICS_ENDPOINT`,
//!    `ACCESS_TOKEN`, `REPORTING_RATE`, `REPORTING_TIMEOUT`,
//!    `FAST_INGEST`, `FAIL_FAST`, `VERBOSE`) plus the host-provided
//!    `AWS_LAMBDA_RUNTIME_API` and `AWS_EXECUTION_ENV`
//! 4. Environment variables with the `LAMBDA_METRICS_` prefix
//!
//! The resulting [`Config`] is constructed once at startup and passed into
//! every component; no component performs its own environment lookups.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/var/task/metrics-extension.toml";
const ENV_PREFIX: &str = "LAMBDA_METRICS_";
const DEFAULT_EXTENSION_NAME: &str = "lambda-metrics-extension";

const MIN_TOKEN_LENGTH: usize = 10;

/// Main configuration struct for the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extension name announced at registration.
    pub name: String,
    /// Control-plane `host:port`, provided by the host environment.
    pub runtime_api: String,
    /// Runtime identifier attached as a metric dimension.
    pub execution_env: String,
    /// Raises the default log filter to debug.
    pub verbose: bool,
    /// Ingest backend configuration.
    pub ingest: IngestConfig,
    /// Reporting cadence configuration.
    pub reporting: ReportingConfig,
    /// Telemetry API subscription configuration.
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DEFAULT_EXTENSION_NAME.to_string(),
            runtime_api: String::new(),
            execution_env: String::new(),
            verbose: false,
            ingest: IngestConfig::default(),
            reporting: ReportingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    #[allow(clippy::result_large_err)]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a custom config file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    #[allow(clippy::result_large_err)]
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if config_path.as_ref().exists() {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(well_known_env());
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("_"));

        figment.extract()
    }

    /// One-line-per-field summary with the access token obfuscated,
    /// suitable for startup logging.
    pub fn summary(&self) -> String {
        format!(
            "name={} endpoint={} token={} fast_ingest={} reporting_rate={}s \
             reporting_timeout={}s fail_fast={} telemetry_enabled={} telemetry_port={}",
            self.name,
            self.ingest.endpoint.as_deref().unwrap_or("<unset>"),
            obfuscated_token(&self.ingest.token),
            self.reporting.fast_ingest,
            self.reporting.interval.as_secs(),
            self.ingest.timeout.as_secs(),
            self.reporting.fail_fast,
            self.telemetry.enabled,
            self.telemetry.port,
        )
    }
}

/// Ingest backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Datapoint endpoint URL. When unset, reporting is skipped.
    pub endpoint: Option<String>,
    /// Access token sent with every datapoint batch.
    pub token: String,
    /// Per-report delivery timeout.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Reporting cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Minimum interval between reports when fast ingest is off.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Report on every invocation instead of on an interval.
    pub fast_ingest: bool,
    /// Treat a failed flush as a terminal condition.
    pub fail_fast: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            fast_ingest: true,
            fail_fast: false,
        }
    }
}

/// Telemetry API subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether to subscribe to the Telemetry API at all.
    pub enabled: bool,
    /// Local port the push listener binds to.
    pub port: u16,
    /// Host-side event buffering declared in the subscription.
    pub buffering: BufferingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 4243,
            buffering: BufferingConfig::default(),
        }
    }
}

/// Host-side buffering limits for the telemetry subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Maximum number of events buffered before delivery.
    pub max_items: u32,
    /// Maximum buffered bytes before delivery.
    pub max_bytes: u32,
    /// Maximum buffering time in milliseconds before delivery.
    pub timeout_ms: u32,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_bytes: 256 * 1024,
            timeout_ms: 500,
        }
    }
}

fn obfuscated_token(token: &str) -> String {
    if token.is_empty() {
        return "<unset>".to_string();
    }
    if token.len() < MIN_TOKEN_LENGTH {
        return format!("<invalid token> minimum {MIN_TOKEN_LENGTH} chars required");
    }
    format!("{}...{}", &token[..2], &token[token.len() - 2..])
}

/// Partial ingest config for well-known env var overrides.
#[derive(Debug, Default, Serialize)]
struct PartialIngest {
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
struct PartialReporting {
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fast_ingest: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fail_fast: Option<bool>,
}

/// Partial config for well-known env var overrides.
#[derive(Debug, Default, Serialize)]
struct PartialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime_api: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    ingest: PartialIngest,
    reporting: PartialReporting,
}

fn well_known_env() -> Serialized<PartialConfig> {
    let mut config = PartialConfig {
        runtime_api: std::env::var("AWS_LAMBDA_RUNTIME_API").ok(),
        execution_env: std::env::var("AWS_EXECUTION_ENV").ok(),
        ..PartialConfig::default()
    };

    config.ingest.endpoint = std::env::var("METRICS_ENDPOINT").ok();
    config.ingest.token = std::env::var("ACCESS_TOKEN").ok();
    config.ingest.timeout = env_seconds("REPORTING_TIMEOUT");
    config.reporting.interval = env_seconds("REPORTING_RATE");
    config.reporting.fast_ingest = env_bool("FAST_INGEST");
    config.reporting.fail_fast = env_bool("FAIL_FAST");
    config.verbose = env_bool("VERBOSE");

    Serialized::defaults(config)
}

fn env_seconds(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(seconds) => Some(seconds),
        Err(_) => {
            tracing::warn!(key, %value, "can't parse number of seconds, ignoring");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.to_lowercase().parse() {
        Ok(flag) => Some(flag),
        Err(_) => {
            tracing::warn!(key, %value, "can't parse bool, ignoring");
            None
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
