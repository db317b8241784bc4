//! `GET /auth/getqr/stream`: one SSE response per observer.
//!
//! The response body owns the observer's [`Subscription`](crate::bus::Subscription),
//! so the subscriber is removed as soon as the connection goes away.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::server::AppState;

pub async fn stream_handler(State(state): State<AppState>) -> Response {
    let subscription = match state.controller.bus().subscribe_channel() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "could not attach stream observer");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };
    debug!(subscriber = %subscription.id(), "stream observer attached");

    let events = subscription
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|event| Event::default().json_data(&event));

    let keep_alive = KeepAlive::new()
        .interval(state.keep_alive)
        .text("keep-alive");

    Sse::new(events).keep_alive(keep_alive).into_response()
}
