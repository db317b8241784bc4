//! Command endpoints: restart, logout and message relay.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use pairline_core::RelayError;

use crate::health;
use crate::server::AppState;

/// Body of `POST /auth/testsend`.
#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub text: String,
}

/// Schedules a restart with a fresh identity and answers right away;
/// observers follow progress on the stream.
pub async fn restart_handler(State(state): State<AppState>) -> Json<Value> {
    info!("restart requested");
    state.controller.schedule_start(true);
    Json(json!({ "ok": true }))
}

pub async fn logout_handler(State(state): State<AppState>) -> Json<Value> {
    info!("logout requested");
    state.controller.terminate().await;
    Json(json!({ "ok": true }))
}

pub async fn relay_handler(
    State(state): State<AppState>,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    match state.controller.relay(&request.phone, &request.text).await {
        Ok(id) => Json(json!({ "ok": true, "id": id })).into_response(),
        Err(e) => (
            relay_status(&e),
            Json(json!({ "ok": false, "error": e.to_string(), "kind": e.error_kind() })),
        )
            .into_response(),
    }
}

fn relay_status(error: &RelayError) -> StatusCode {
    match error {
        RelayError::InvalidDestination(_) | RelayError::EmptyMessage => StatusCode::BAD_REQUEST,
        RelayError::SessionNotReady => StatusCode::CONFLICT,
        RelayError::SendFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Json<health::HealthResponse> {
    let identity = state.controller.identity();
    Json(health::health_check(
        state.start_time,
        state.started_at,
        state.controller.bus().subscriber_count(),
        identity.as_ref(),
        &state.controller.snapshot(),
    ))
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_errors_map_to_statuses() {
        assert_eq!(
            relay_status(&RelayError::InvalidDestination("123".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(relay_status(&RelayError::EmptyMessage), StatusCode::BAD_REQUEST);
        assert_eq!(relay_status(&RelayError::SessionNotReady), StatusCode::CONFLICT);
        assert_eq!(
            relay_status(&RelayError::SendFailed("x".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn relay_request_tolerates_missing_fields() {
        let req: RelayRequest = serde_json::from_str(r#"{"phone":"593987654321"}"#).unwrap();
        assert_eq!(req.phone, "593987654321");
        assert!(req.text.is_empty());
    }
}
