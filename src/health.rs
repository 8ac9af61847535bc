use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use crate::AppState;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub model: String,
    pub token: &'static str,
    pub speech: &'static str,
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

// The credential is fetched lazily on the first turn, so a missing token is not unready.
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let token = state.session.tokens().state().await;

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            model: state.chat.model().to_string(),
            token: token.as_str(),
            speech: if state.speech.is_available() { "configured" } else { "disabled" },
        }),
    )
}
