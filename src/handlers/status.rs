use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub genai_client: bool,
    pub trellis_pipeline: bool,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "3D Toy Generation API is running!",
    })
}

/// Reports whether each collaborator finished initializing. Never probes them.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        genai_client: state.service.model_ready(),
        trellis_pipeline: state.service.pipeline_ready(),
    })
}
