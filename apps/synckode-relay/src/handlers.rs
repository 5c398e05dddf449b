use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::rooms::RoomDocument;
use crate::state::RelayStats;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

/// Directory entry without the document body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    id: String,
    name: String,
    language: String,
    online: usize,
}

impl RoomSummary {
    fn new(room: RoomDocument, online: usize) -> Self {
        Self {
            id: room.id,
            name: room.name,
            language: room.language,
            online,
        }
    }
}

/// GET /health - Health check endpoint
pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// GET /stats - live presence and process counts
pub async fn stats(State(state): State<AppState>) -> Json<RelayStats> {
    Json(state.relay.stats())
}

/// GET /rooms - known rooms with their live member counts
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    let rooms = state
        .relay
        .directory
        .list_rooms()
        .into_iter()
        .map(|room| {
            let online = state.relay.rooms.members(&room.id).len();
            RoomSummary::new(room, online)
        })
        .collect();
    Json(rooms)
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecConfig;
    use crate::rooms::MemoryRoomDirectory;
    use crate::state::RelayState;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app_state() -> AppState {
        AppState {
            relay: RelayState::new(
                Arc::new(MemoryRoomDirectory::with_default_rooms()),
                ExecConfig::default(),
            ),
            metrics: None,
        }
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = crate::router(app_state())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[test_timeout::tokio_timeout_test]
    async fn health_reports_ok() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[test_timeout::tokio_timeout_test]
    async fn stats_start_empty() {
        let (status, body) = get_json("/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"], 0);
        assert_eq!(body["rooms_active"], 0);
        assert_eq!(body["processes_running"], 0);
        assert_eq!(body["rooms"], serde_json::json!([]));
    }

    #[test_timeout::tokio_timeout_test]
    async fn rooms_lists_the_seeded_directory() {
        let (status, body) = get_json("/rooms").await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|room| room["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["nexus-hackathon", "python-ml", "react-workshop"]);
        assert_eq!(body[0]["online"], 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn metrics_without_recorder_is_not_found() {
        let (status, _) = get_json("/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
