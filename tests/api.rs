mod support;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use marketradar::config::Config;
use marketradar::extractor::RegexExtractor;
use marketradar::face::{self, AppState};

use support::{FakeFactory, three_shops};

fn app_state() -> AppState {
    app_state_with(&[])
}

fn app_state_with(extra: &[(&str, &str)]) -> AppState {
    let config = Config::from_lookup(|key| match key {
        "PUBLIC_WS_BASE" => Some("ws://radar.test".to_string()),
        _ => extra
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string()),
    })
    .unwrap();
    AppState::new(
        &config,
        Arc::new(FakeFactory {
            shops: three_shops(),
        }),
        Arc::new(RegexExtractor::default()),
    )
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = face::router(state.clone())
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn start_returns_id_and_stream_url() {
    let state = app_state();
    let (status, body) = send(
        &state,
        "POST",
        "/api/v1/mission/start",
        Some(json!({"goal": "Find the average price of Creatine in Brazil"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let id = body["mission_id"].as_str().unwrap();
    assert_eq!(body["websocket_url"], format!("ws://radar.test/ws/{id}"));

    let (status, body) = send(&state, "GET", &format!("/api/v1/mission/{id}/status"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "created");
    assert_eq!(body["is_running"], false);
    assert_eq!(body["is_complete"], false);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_dispatch() {
    let state = app_state();
    for payload in [
        json!({"goal": "   "}),
        json!({"goal": "price of rice", "max_iterations": 0}),
        json!({"goal": "price of rice", "max_iterations": 501}),
        json!({"headless": true}),
    ] {
        let (status, _) = send(&state, "POST", "/api/v1/mission/start", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn unknown_mission_is_not_found() {
    let state = app_state();
    let id = uuid::Uuid::new_v4();
    for (method, uri) in [
        ("GET", format!("/api/v1/mission/{id}/status")),
        ("POST", format!("/api/v1/mission/{id}/stop")),
        ("DELETE", format!("/api/v1/mission/{id}")),
    ] {
        let (status, body) = send(&state, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert!(body["detail"].as_str().unwrap().contains("not found"));
    }
}

#[tokio::test]
async fn stop_before_launch_cancels_and_delete_removes() {
    let state = app_state();
    let (_, body) = send(
        &state,
        "POST",
        "/api/v1/mission/start",
        Some(json!({"goal": "price of creatine", "max_iterations": 20})),
    )
    .await;
    let id = body["mission_id"].as_str().unwrap().to_string();

    let (status, body) = send(&state, "POST", &format!("/api/v1/mission/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "cancelled");

    let (status, _) = send(&state, "DELETE", &format!("/api/v1/mission/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&state, "GET", &format!("/api/v1/mission/{id}/status"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_console_are_served() {
    let state = app_state();
    let (status, body) = send(&state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let response = face::router(state)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("MarketRadar"));
}

async fn preflight(state: AppState, origin: &str) -> axum::response::Response {
    face::router(state)
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/mission/start")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn cors_allows_any_origin_by_default() {
    let response = preflight(app_state(), "http://localhost:5173").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn cors_restricts_to_configured_origins() {
    let state = app_state_with(&[("CORS_ORIGINS", "https://radar.example")]);

    let response = preflight(state.clone(), "https://radar.example").await;
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://radar.example"
    );

    let response = preflight(state, "https://evil.example").await;
    assert!(!response.headers().contains_key("access-control-allow-origin"));
}
