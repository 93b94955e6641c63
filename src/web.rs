//! ==============================================================================
//! web.rs - http api
//! ==============================================================================
//!
//! purpose:
//!     maps the boundary operations onto the coordinator.
//!     bodies are parsed here rather than by axum's Json extractor so every
//!     malformed payload comes back as the same 400 INVALID_INPUT shape.
//!
//! routes:
//!     POST  /api/telemetry          sensor device pushes a reading
//!     GET   /api/command            field device polls actuator flags
//!     POST  /api/command            operator full-state write (missing = off)
//!     PATCH /api/command            operator partial write (missing = unchanged)
//!     POST  /api/detection          detection report, optional image body
//!                                   (capped at detection.max_image_bytes)
//!     GET   /api/telemetry/latest   newest reading or {}
//!     GET   /api/telemetry/recent   newest readings, most recent first
//!     GET   /api/alerts/latest      newest alert or {"detected": 0}
//!     GET   /api/overview           telemetry + alert + command state
//!     GET   /healthz                liveness and counters
//!
//! ==============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::DetectionConfig;
use crate::coordinator::{Coordinator, Health, Overview};
use crate::detection::Detector;
use crate::domain::{Actuators, CommandPayload, SensorReading, TelemetryPayload};
use crate::error::Result;

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Coordinator>,
    pub detector: Arc<Detector>,
    /// body cap for detection reports, which may carry an image
    pub max_image_bytes: usize,
}

impl AppState {
    pub fn new(hub: Coordinator, detector: Detector) -> Self {
        Self {
            hub: Arc::new(hub),
            detector: Arc::new(detector),
            max_image_bytes: DetectionConfig::default().max_image_bytes,
        }
    }

    pub fn with_image_limit(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let image_limit = state.max_image_bytes;

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/telemetry", post(ingest_handler))
        .route("/api/telemetry/latest", get(latest_telemetry_handler))
        .route("/api/telemetry/recent", get(recent_telemetry_handler))
        .route(
            "/api/command",
            get(read_command_handler).post(set_command_handler).patch(patch_command_handler),
        )
        .route(
            "/api/detection",
            post(detection_handler).layer(DefaultBodyLimit::max(image_limit)),
        )
        .route("/api/alerts/latest", get(latest_alert_handler))
        .route("/api/overview", get(overview_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// an empty body reads as `{}`
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

// ==============================================================================
// field device
// ==============================================================================

async fn ingest_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>> {
    let payload: TelemetryPayload = parse_body(&body)?;
    state.hub.ingest_telemetry(payload).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn read_command_handler(State(state): State<AppState>) -> Json<Actuators> {
    Json(state.hub.command().await)
}

// ==============================================================================
// operator
// ==============================================================================

async fn set_command_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>> {
    let payload: CommandPayload = parse_body(&body)?;
    state.hub.set_command(payload).await?;
    Ok(Json(json!({"status": "updated"})))
}

async fn patch_command_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>> {
    let payload: CommandPayload = parse_body(&body)?;
    state.hub.patch_command(payload).await?;
    Ok(Json(json!({"status": "updated"})))
}

// ==============================================================================
// detection pipeline
// ==============================================================================

async fn detection_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>> {
    let detected = state.detector.classify(body).await?;
    state.hub.report_detection(detected).await?;
    Ok(Json(json!({"status": "ok", "detected": u8::from(detected)})))
}

// ==============================================================================
// dashboard views
// ==============================================================================

async fn latest_telemetry_handler(State(state): State<AppState>) -> Response {
    match state.hub.latest_telemetry().await {
        Some(reading) => Json(reading).into_response(),
        None => Json(json!({})).into_response(),
    }
}

async fn recent_telemetry_handler(State(state): State<AppState>) -> Json<Vec<SensorReading>> {
    Json(state.hub.recent_telemetry().await)
}

async fn latest_alert_handler(State(state): State<AppState>) -> Response {
    match state.hub.latest_alert().await {
        Some(alert) => Json(alert).into_response(),
        None => Json(json!({"detected": 0})).into_response(),
    }
}

async fn overview_handler(State(state): State<AppState>) -> Json<Overview> {
    Json(state.hub.overview().await)
}

async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    Json(state.hub.health().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::DEFAULT_RECENT_LIMIT;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let state = AppState::new(Coordinator::new(DEFAULT_RECENT_LIMIT), Detector::TrustCaller);
        (router(state.clone()), state)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn test_empty_views() {
        let (app, _) = app();
        assert_eq!(call(&app, Method::GET, "/api/telemetry/latest", "").await, (StatusCode::OK, json!({})));
        assert_eq!(call(&app, Method::GET, "/api/telemetry/recent", "").await, (StatusCode::OK, json!([])));
        assert_eq!(call(&app, Method::GET, "/api/alerts/latest", "").await, (StatusCode::OK, json!({"detected": 0})));
        assert_eq!(
            call(&app, Method::GET, "/api/command", "").await,
            (StatusCode::OK, json!({"spray": 0, "light": 0, "buzzer": 0}))
        );
    }

    #[tokio::test]
    async fn test_telemetry_flow() {
        let (app, _) = app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/telemetry",
            r#"{"temperature": 22.5, "humidity": 60.0, "time": "2024-01-01T00:00:00"}"#,
        )
        .await;
        assert_eq!((status, body), (StatusCode::OK, json!({"status": "ok"})));
        call(
            &app,
            Method::POST,
            "/api/telemetry",
            r#"{"temperature": 23.1, "humidity": 58.0, "time": "2024-01-01T00:05:00"}"#,
        )
        .await;

        let newest = json!({"temperature": 23.1, "humidity": 58.0, "time": "2024-01-01T00:05:00"});
        assert_eq!(call(&app, Method::GET, "/api/telemetry/latest", "").await.1, newest);

        let (_, recent) = call(&app, Method::GET, "/api/telemetry/recent", "").await;
        assert_eq!(recent.as_array().unwrap().len(), 2);
        assert_eq!(recent[0], newest);
    }

    #[tokio::test]
    async fn test_bad_telemetry_is_400() {
        let (app, state) = app();
        for body in [
            "",
            "not json",
            r#"{"temperature": "hot", "humidity": 1, "time": "2024-01-01T00:00:00"}"#,
            r#"{"temperature": 1, "humidity": 1}"#,
            r#"{"temperature": 1, "humidity": 1, "time": "tuesday"}"#,
        ] {
            let (status, err) = call(&app, Method::POST, "/api/telemetry", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(err["error_code"], "INVALID_INPUT");
        }
        assert!(state.hub.latest_telemetry().await.is_none());
    }

    #[tokio::test]
    async fn test_command_set_and_patch() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::POST, "/api/command", r#"{"spray": 1, "light": true}"#).await;
        assert_eq!((status, body), (StatusCode::OK, json!({"status": "updated"})));
        assert_eq!(call(&app, Method::GET, "/api/command", "").await.1, json!({"spray": 1, "light": 1, "buzzer": 0}));

        call(&app, Method::PATCH, "/api/command", r#"{"light": 0}"#).await;
        assert_eq!(call(&app, Method::GET, "/api/command", "").await.1, json!({"spray": 1, "light": 0, "buzzer": 0}));

        // full write with an empty body turns everything off
        call(&app, Method::POST, "/api/command", "").await;
        assert_eq!(call(&app, Method::GET, "/api/command", "").await.1, json!({"spray": 0, "light": 0, "buzzer": 0}));

        let (status, _) = call(&app, Method::POST, "/api/command", r#"{"spray": 7}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_detection_escalates_buzzer() {
        let (app, _) = app();
        call(&app, Method::POST, "/api/command", r#"{"spray": 1}"#).await;

        let (status, body) = call(&app, Method::POST, "/api/detection", "").await;
        assert_eq!((status, body), (StatusCode::OK, json!({"status": "ok", "detected": 1})));
        assert_eq!(call(&app, Method::GET, "/api/command", "").await.1, json!({"spray": 1, "light": 0, "buzzer": 1}));

        let (_, alert) = call(&app, Method::GET, "/api/alerts/latest", "").await;
        assert_eq!(alert["detected"], 1);
        assert!(alert["time"].is_string());

        let (_, overview) = call(&app, Method::GET, "/api/overview", "").await;
        assert_eq!(overview["command"]["buzzer"], true);
        assert_eq!(overview["alert"]["detected"], 1);
        assert!(overview["telemetry"].is_null());
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/healthz", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["readings"], 0);
        assert!(body["storage"].is_null());
    }

    async fn post_bytes(app: &Router, uri: &str, body: Vec<u8>) -> StatusCode {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/octet-stream")
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_detection_accepts_large_image() {
        let (app, state) = app();
        // larger than axum's 2 MB default
        let image = vec![0xd8u8; 3 * 1024 * 1024];
        assert_eq!(post_bytes(&app, "/api/detection", image).await, StatusCode::OK);
        assert!(state.hub.latest_alert().await.is_some());
    }

    #[tokio::test]
    async fn test_detection_image_over_limit_is_413() {
        let state = AppState::new(Coordinator::new(DEFAULT_RECENT_LIMIT), Detector::TrustCaller).with_image_limit(1024);
        let app = router(state.clone());

        assert_eq!(post_bytes(&app, "/api/detection", vec![0u8; 4096]).await, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(state.hub.latest_alert().await.is_none());
        assert_eq!(post_bytes(&app, "/api/detection", vec![0u8; 512]).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_legacy_data_route_is_gone() {
        let (app, _) = app();
        let (status, _) = call(&app, Method::GET, "/api/data", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_storage_failure_is_503() {
        let hub = Coordinator::from_store(Store::open_in_memory().await.unwrap(), DEFAULT_RECENT_LIMIT)
            .await
            .unwrap();
        hub.break_storage().await;
        let state = AppState::new(hub, Detector::TrustCaller);
        let app = router(state.clone());

        let (status, err) = call(
            &app,
            Method::POST,
            "/api/telemetry",
            r#"{"temperature": 22.5, "humidity": 60.0, "time": "2024-01-01T00:00:00"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err["error_code"], "STORAGE_UNAVAILABLE");

        let (status, _) = call(&app, Method::POST, "/api/detection", "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(state.hub.latest_alert().await.is_none());
        assert_eq!(call(&app, Method::GET, "/api/command", "").await.1, json!({"spray": 0, "light": 0, "buzzer": 0}));
    }
}
