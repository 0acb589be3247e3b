//! Extensions API lifecycle client.
//!
//! Speaks the control-plane protocol: register, block on the next
//! lifecycle event, and report init/exit errors before terminating. Every
//! network operation is fatal on failure — the host kills the process
//! anyway, so there is no retry loop in here.

use crate::config::Config;
use crate::shutdown::ShutdownCondition;
use serde::Deserialize;
use std::time::Duration;

pub(crate) const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
pub(crate) const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";
const ERROR_TYPE_HEADER: &str = "Lambda-Extension-Function-Error-Type";

const API_VERSION: &str = "2020-01-01";
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_TYPE_INVOKE: &str = "INVOKE";
const EVENT_TYPE_SHUTDOWN: &str = "SHUTDOWN";

/// A lifecycle event returned by one poll of the control API.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "eventType")]
pub enum Event {
    /// The function is being invoked.
    #[serde(rename = "INVOKE", rename_all = "camelCase")]
    Invoke {
        /// Resource string the function was invoked through.
        invoked_function_arn: String,
        /// Request id of the invocation.
        request_id: String,
        /// Invocation deadline, milliseconds since epoch.
        #[serde(default)]
        deadline_ms: i64,
    },
    /// The environment is shutting down. A normal terminal event, not an
    /// error.
    #[serde(rename = "SHUTDOWN", rename_all = "camelCase")]
    Shutdown {
        /// Host-supplied shutdown reason.
        #[serde(default)]
        shutdown_reason: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    #[serde(default)]
    function_name: String,
    #[serde(default)]
    function_version: String,
    #[serde(default)]
    handler: String,
}

/// Unregistered control-plane client.
#[derive(Debug)]
pub struct ExtensionClient {
    base: String,
    /// No timeout: the next-event call blocks for as long as the host
    /// keeps the environment alive.
    poll: reqwest::Client,
    control: reqwest::Client,
}

impl ExtensionClient {
    /// Creates a client for the configured control plane.
    pub fn new(config: &Config) -> Result<Self, ShutdownCondition> {
        let poll = reqwest::Client::builder().build().map_err(client_error)?;
        let control = reqwest::Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .build()
            .map_err(client_error)?;

        Ok(Self {
            base: format!("http://{}/{API_VERSION}/extension", config.runtime_api),
            poll,
            control,
        })
    }

    /// Registers for invoke and shutdown events.
    ///
    /// The session identifier must arrive in exactly one
    /// `Lambda-Extension-Identifier` response header; absence or
    /// multiplicity is a fatal protocol error. On any failure the caller
    /// must not proceed to polling.
    pub async fn register(self, name: &str) -> Result<RegisteredExtension, ShutdownCondition> {
        tracing::info!(name, "registering");

        let response = self
            .control
            .post(format!("{}/register", self.base))
            .header(EXTENSION_NAME_HEADER, name)
            .json(&serde_json::json!({
                "events": [EVENT_TYPE_INVOKE, EVENT_TYPE_SHUTDOWN],
            }))
            .send()
            .await
            .map_err(|error| ShutdownCondition::api(format!("can't register: {error}")))?;

        let status = response.status();
        let ids: Vec<String> = response
            .headers()
            .get_all(EXTENSION_ID_HEADER)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        let body = response
            .text()
            .await
            .map_err(|error| ShutdownCondition::api(format!("can't read register body: {error}")))?;

        if !status.is_success() {
            return Err(ShutdownCondition::api(format!(
                "failed to register, API returned {status}: {body}"
            )));
        }

        if ids.len() != 1 {
            return Err(ShutdownCondition::api(format!(
                "{EXTENSION_ID_HEADER} header missing or ambiguous: {ids:?}"
            )));
        }

        let parsed: RegisterResponse = serde_json::from_str(&body).map_err(|error| {
            ShutdownCondition::api(format!(
                "unknown format of a register response: {error}: {body}"
            ))
        })?;

        tracing::info!(
            function_name = %parsed.function_name,
            function_version = %parsed.function_version,
            handler = %parsed.handler,
            "registered"
        );

        Ok(RegisteredExtension {
            client: self,
            extension_id: ids.into_iter().next().unwrap_or_default(),
            function_name: parsed.function_name,
            function_version: parsed.function_version,
        })
    }
}

fn client_error(error: reqwest::Error) -> ShutdownCondition {
    ShutdownCondition::internal(format!("can't create http client: {error}"))
}

/// A registered control-plane session.
#[derive(Debug)]
pub struct RegisteredExtension {
    client: ExtensionClient,
    extension_id: String,
    /// Function name from the registration response.
    pub function_name: String,
    /// Function version from the registration response.
    pub function_version: String,
}

impl RegisteredExtension {
    /// The session identifier assigned at registration.
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Blocks until the host delivers the next lifecycle event.
    ///
    /// # Errors
    ///
    /// Any transport, status or decoding failure is an api-classified
    /// condition. A shutdown-typed response is an `Ok` value.
    pub async fn next_event(&self) -> Result<Event, ShutdownCondition> {
        tracing::debug!("waiting for event");

        let response = self
            .client
            .poll
            .get(format!("{}/event/next", self.client.base))
            .header(EXTENSION_ID_HEADER, &self.extension_id)
            .send()
            .await
            .map_err(|error| ShutdownCondition::api(format!("can't get next event: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ShutdownCondition::api(format!("can't read event body: {error}")))?;

        if !status.is_success() {
            return Err(ShutdownCondition::api(format!(
                "failed to get the next event, API returned {status}: {body}"
            )));
        }

        let event: Event = serde_json::from_str(&body).map_err(|error| {
            ShutdownCondition::api(format!("unknown format of an event: {error}: {body}"))
        })?;

        tracing::debug!(?event, "received event");
        Ok(event)
    }

    /// Best-effort report of a fatal initialization failure. The process
    /// should exit right after.
    pub async fn report_init_error(&self, error_type: &str) {
        tracing::warn!(error_type, "reporting an init error");
        self.report_error("init/error", error_type).await;
    }

    /// Best-effort report of a fatal runtime failure. The process should
    /// exit right after.
    pub async fn report_exit_error(&self, error_type: &str) {
        tracing::warn!(error_type, "reporting an exit error");
        self.report_error("exit/error", error_type).await;
    }

    async fn report_error(&self, path: &str, error_type: &str) {
        let result = self
            .client
            .control
            .post(format!("{}/{path}", self.client.base))
            .header(EXTENSION_ID_HEADER, &self.extension_id)
            .header(ERROR_TYPE_HEADER, error_type)
            .send()
            .await;

        match result {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "error report delivered");
            }
            Err(error) => {
                tracing::warn!(%error, "failed to deliver error report");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_invoke_event() {
        let json = r#"{
            "eventType": "INVOKE",
            "deadlineMs": 1700000060000,
            "requestId": "req-1",
            "invokedFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:helloworld",
            "tracing": {"type": "X-Amzn-Trace-Id", "value": "Root=1-abc"}
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        match event {
            Event::Invoke {
                invoked_function_arn,
                request_id,
                deadline_ms,
            } => {
                assert!(invoked_function_arn.ends_with("helloworld"));
                assert_eq!(request_id, "req-1");
                assert_eq!(deadline_ms, 1_700_000_060_000);
            }
            other => panic!("expected Invoke, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_shutdown_event() {
        let json = r#"{"eventType": "SHUTDOWN", "shutdownReason": "spindown", "deadlineMs": 1}"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            Event::Shutdown {
                shutdown_reason: "spindown".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_event_type_fails_decoding() {
        let json = r#"{"eventType": "RESTART"}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }
}
