//! Full-runtime tests: a fake host serving both the Extensions API and
//! the Telemetry API, driven through register → invoke → shutdown.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use lambda_metrics_extension::{Config, ExtensionRuntime, ShutdownReason};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const EXTENSION_ID: &str = "runtime-test-id";

#[derive(Default)]
struct FakeHost {
    fail_next_event: bool,
    events: Mutex<VecDeque<serde_json::Value>>,
    error_reports: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<serde_json::Value>>,
}

async fn register(State(_state): State<Arc<FakeHost>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Lambda-Extension-Identifier",
        HeaderValue::from_static(EXTENSION_ID),
    );

    let body = serde_json::json!({
        "functionName": "helloworld",
        "functionVersion": "7",
        "handler": "index.handler",
    });

    (StatusCode::OK, headers, Json(body)).into_response()
}

async fn next_event(State(state): State<Arc<FakeHost>>) -> Response {
    if state.fail_next_event {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    let event = state.events.lock().unwrap().pop_front().unwrap_or_else(|| {
        serde_json::json!({"eventType": "SHUTDOWN", "shutdownReason": "spindown"})
    });

    Json(event).into_response()
}

async fn report_error(
    State(state): State<Arc<FakeHost>>,
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

async fn subscribe(
    State(state): State<Arc<FakeHost>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.subscriptions.lock().unwrap().push(body);
    StatusCode::OK
}

async fn start_host(state: Arc<FakeHost>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new()
        .route("/2020-01-01/extension/register", post(register))
        .route("/2020-01-01/extension/event/next", get(next_event))
        .route("/2020-01-01/extension/{kind}/error", post(report_error))
        .route("/2022-07-01/telemetry", put(subscribe))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

fn invoke_event(request_id: &str) -> serde_json::Value {
    serde_json::json!({
        "eventType": "INVOKE",
        "deadlineMs": 1_700_000_060_000u64,
        "requestId": request_id,
        "invokedFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:helloworld",
    })
}

#[tokio::test]
async fn test_run_until_host_shutdown() {
    let state = Arc::new(FakeHost {
        events: Mutex::new(vec![invoke_event("req-1"), invoke_event("req-2")].into()),
        ..FakeHost::default()
    });
    let addr = start_host(Arc::clone(&state)).await;

    let mut config = Config {
        runtime_api: addr.to_string(),
        ..Config::default()
    };
    config.telemetry.port = 14641;

    let condition = ExtensionRuntime::new(config).run().await;

    assert!(!condition.is_error());
    assert_eq!(condition.reason_label(), "spindown");

    // A clean shutdown reports nothing to the control plane.
    assert!(state.error_reports.lock().unwrap().is_empty());

    // The telemetry subscription handshake went through once.
    assert_eq!(state.subscriptions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_control_plane_failure_reports_exit_error() {
    let state = Arc::new(FakeHost {
        fail_next_event: true,
        ..FakeHost::default()
    });
    let addr = start_host(Arc::clone(&state)).await;

    let mut config = Config {
        runtime_api: addr.to_string(),
        ..Config::default()
    };
    config.telemetry.enabled = false;

    let condition = ExtensionRuntime::new(config).run().await;

    assert!(condition.is_error());
    assert_eq!(condition.reason(), &ShutdownReason::Api);
    assert_eq!(
        state.error_reports.lock().unwrap().as_slice(),
        [("exit".to_string(), "api".to_string())]
    );

    // Telemetry was disabled: no handshake was attempted.
    assert!(state.subscriptions.lock().unwrap().is_empty());
}
