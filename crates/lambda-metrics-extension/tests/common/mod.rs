//! Shared helpers for integration tests.

use std::time::Duration;

/// Polls until something answers HTTP on the given local port, or fails
/// after the timeout.
pub async fn wait_for_http_ready(port: u16, timeout: Duration) -> Result<(), String> {
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if client
            .get(format!("http://127.0.0.1:{port}/"))
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            return Err(format!("port {port} not ready within {timeout:?}"));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
