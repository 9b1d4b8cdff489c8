//! Integration tests for the relay's HTTP surface.

use serial_test::serial;

use agent_relay::config::GlobalConfig;

use super::test_helpers::spawn_relay;

/// `GET /` returns the liveness summary.
#[tokio::test]
#[serial]
async fn root_returns_status_ok() {
    let (addr, _state) = spawn_relay(GlobalConfig::default()).await;

    let resp = reqwest::get(format!("http://{addr}/"))
        .await
        .expect("HTTP GET /");
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.expect("json body");
    assert_eq!(body["status"], "ok");
    assert!(
        body["message"].as_str().is_some_and(|m| !m.is_empty()),
        "message must be present: {body}"
    );
}

/// `GET /health` returns the health probe body.
#[tokio::test]
#[serial]
async fn health_returns_healthy() {
    let (addr, _state) = spawn_relay(GlobalConfig::default()).await;

    let resp = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("HTTP GET /health");
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.expect("json body");
    assert_eq!(body["status"], "healthy");
}

/// Unknown routes return 404.
#[tokio::test]
#[serial]
async fn unknown_route_returns_404() {
    let (addr, _state) = spawn_relay(GlobalConfig::default()).await;

    let resp = reqwest::get(format!("http://{addr}/nonexistent"))
        .await
        .expect("HTTP GET /nonexistent");
    assert_eq!(resp.status(), 404);
}
