//! Generation endpoints
//!
//! `POST /generate` takes a JSON body, `GET /generate_diss` the same fields as
//! query parameters. Both run the pipeline to completion before responding.

use crate::error::{ApiError, ApiResult};
use crate::models::{GenerationOptions, LyricStyle, MasteringReport, PipelineRequest};
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Generation parameters
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Reddit post URL
    pub url: String,
    /// Beat library file name or http(s) URL; the configured default when absent
    #[serde(default)]
    pub beat: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub flow_complexity: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub run_id: Uuid,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub lyrics: Vec<String>,
    pub report: MasteringReport,
    /// Where the WAV rendering can be downloaded
    pub track_url: String,
}

/// POST /generate
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    run_generation(state, request).await.map(Json)
}

/// GET /generate_diss
pub async fn generate_diss(
    State(state): State<AppState>,
    Query(request): Query<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    run_generation(state, request).await.map(Json)
}

async fn run_generation(state: AppState, request: GenerateRequest) -> ApiResult<GenerateResponse> {
    let pipeline_request = build_request(&state, &request)?;
    let run_id = Uuid::new_v4();
    info!(run_id = %run_id, url = %pipeline_request.source_url(), "Generation requested");

    let generated = state
        .orchestrator
        .run(run_id, pipeline_request)
        .await
        .map_err(|error| ApiError::Pipeline { run_id, error })?;

    let track = generated.track();
    Ok(GenerateResponse {
        run_id,
        duration_seconds: track.duration_seconds,
        sample_rate: track.sample_rate,
        lyrics: generated.lyrics.iter().map(|l| l.text.clone()).collect(),
        report: generated.mastered.report.clone(),
        track_url: format!("/tracks/{}", run_id),
    })
}

fn build_request(state: &AppState, request: &GenerateRequest) -> Result<PipelineRequest, ApiError> {
    let defaults = GenerationOptions::default();
    let options = GenerationOptions {
        style: request
            .style
            .as_deref()
            .map(LyricStyle::parse)
            .unwrap_or(defaults.style),
        flow_complexity: request.flow_complexity.unwrap_or(defaults.flow_complexity),
    };

    let default_beat = state.orchestrator.config().beats.default_beat.as_deref();
    let beat = request
        .beat
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .or(default_beat);

    Ok(PipelineRequest::new(&request.url, beat, options)?)
}

/// Build generation routes
pub fn generate_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/generate_diss", get(generate_diss))
}
