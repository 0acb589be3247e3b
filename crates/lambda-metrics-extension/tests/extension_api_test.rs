//! Integration tests for the lifecycle client against a fake control
//! plane.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lambda_metrics_extension::{Config, Event, ExtensionClient};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const EXTENSION_ID: &str = "test-extension-id";

#[derive(Default)]
struct ControlPlane {
    omit_identifier: bool,
    events: Mutex<VecDeque<serde_json::Value>>,
    error_reports: Mutex<Vec<(String, String)>>,
    registered_names: Mutex<Vec<String>>,
}

impl ControlPlane {
    fn with_events(events: Vec<serde_json::Value>) -> Self {
        Self {
            events: Mutex::new(events.into()),
            ..Self::default()
        }
    }
}

async fn register(
    State(state): State<Arc<ControlPlane>>,
    headers: HeaderMap,
) -> Response {
    let name = headers
        .get("Lambda-Extension-Name")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.registered_names.lock().unwrap().push(name);

    let mut response_headers = HeaderMap::new();
    if !state.omit_identifier {
        response_headers.insert(
            "Lambda-Extension-Identifier",
            HeaderValue::from_static(EXTENSION_ID),
        );
    }

    let body = serde_json::json!({
        "functionName": "helloworld",
        "functionVersion": "7",
        "handler": "index.handler",
    });

    (StatusCode::OK, response_headers, Json(body)).into_response()
}

async fn next_event(State(state): State<Arc<ControlPlane>>, headers: HeaderMap) -> Response {
    assert_eq!(
        headers
            .get("Lambda-Extension-Identifier")
            .and_then(|value| value.to_str().ok()),
        Some(EXTENSION_ID)
    );

    let event = state.events.lock().unwrap().pop_front().unwrap_or_else(|| {
        serde_json::json!({"eventType": "SHUTDOWN", "shutdownReason": "spindown"})
    });

    Json(event).into_response()
}

async fn report_error(
    State(state): State<Arc<ControlPlane>>,
    axum::extract::Path(kind): axum::extract::Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    let error_type = headers
        .get("Lambda-Extension-Function-Error-Type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.error_reports.lock().unwrap().push((kind, error_type));
    StatusCode::ACCEPTED
}

async fn start_control_plane(state: Arc<ControlPlane>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new()
        .route("/2020-01-01/extension/register", post(register))
        .route("/2020-01-01/extension/event/next", get(next_event))
        .route("/2020-01-01/extension/{kind}/error", post(report_error))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

fn config_for(addr: SocketAddr) -> Config {
    Config {
        runtime_api: addr.to_string(),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_register_and_poll_through_shutdown() {
    let invoke = serde_json::json!({
        "eventType": "INVOKE",
        "deadlineMs": 1_700_000_060_000u64,
        "requestId": "req-1",
        "invokedFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:helloworld",
    });
    let state = Arc::new(ControlPlane::with_events(vec![invoke]));
    let addr = start_control_plane(Arc::clone(&state)).await;

    let client = ExtensionClient::new(&config_for(addr)).unwrap();
    let api = client.register("metrics-extension").await.unwrap();

    assert_eq!(api.extension_id(), EXTENSION_ID);
    assert_eq!(api.function_name, "helloworld");
    assert_eq!(api.function_version, "7");
    assert_eq!(
        state.registered_names.lock().unwrap().as_slice(),
        ["metrics-extension"]
    );

    match api.next_event().await.unwrap() {
        Event::Invoke {
            invoked_function_arn,
            request_id,
            deadline_ms,
        } => {
            assert!(invoked_function_arn.ends_with("function:helloworld"));
            assert_eq!(request_id, "req-1");
            assert_eq!(deadline_ms, 1_700_000_060_000);
        }
        other => panic!("expected Invoke, got {:?}", other),
    }

    // The queue is drained: the host now answers with a shutdown event,
    // which is a normal value, not an error.
    match api.next_event().await.unwrap() {
        Event::Shutdown { shutdown_reason } => assert_eq!(shutdown_reason, "spindown"),
        other => panic!("expected Shutdown, got {:?}", other),
    }
}

#[tokio::test]
async fn test_register_without_identifier_header_is_api_error() {
    let state = Arc::new(ControlPlane {
        omit_identifier: true,
        ..ControlPlane::default()
    });
    let addr = start_control_plane(state).await;

    let client = ExtensionClient::new(&config_for(addr)).unwrap();
    let condition = client.register("metrics-extension").await.unwrap_err();

    assert!(condition.is_error());
    assert_eq!(condition.reason_label(), "api");
    assert!(condition.message().contains("Lambda-Extension-Identifier"));
}

#[tokio::test]
async fn test_register_against_dead_endpoint_is_api_error() {
    let config = Config {
        runtime_api: "127.0.0.1:9".to_string(),
        ..Config::default()
    };

    let client = ExtensionClient::new(&config).unwrap();
    let condition = client.register("metrics-extension").await.unwrap_err();

    assert!(condition.is_error());
    assert_eq!(condition.reason_label(), "api");
}

#[tokio::test]
async fn test_error_reports_carry_type_header() {
    let state = Arc::new(ControlPlane::default());
    let addr = start_control_plane(Arc::clone(&state)).await;

    let client = ExtensionClient::new(&config_for(addr)).unwrap();
    let api = client.register("metrics-extension").await.unwrap();

    api.report_init_error("api").await;
    api.report_exit_error("metric").await;

    let reports = state.error_reports.lock().unwrap();
    assert_eq!(
        reports.as_slice(),
        [
            ("init".to_string(), "api".to_string()),
            ("exit".to_string(), "metric".to_string()),
        ]
    );
}
