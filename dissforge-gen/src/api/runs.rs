//! Run status and track download

use crate::audio::wav::encode_wav_16;
use crate::error::{ApiError, ApiResult};
use crate::models::RunStatus;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

/// GET /runs/:run_id
pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> ApiResult<Json<RunStatus>> {
    state
        .orchestrator
        .runs()
        .status(run_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {}", run_id)))
}

/// GET /tracks/:run_id
///
/// The mastered mix as a 16-bit PCM WAV file.
pub async fn get_track(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let output = state
        .orchestrator
        .runs()
        .output(run_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("track for run {}", run_id)))?;

    let mastered = output.mastered;
    let wav = tokio::task::spawn_blocking(move || {
        let track = &mastered.track;
        encode_wav_16(&track.samples, track.channels, track.sample_rate)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("WAV encoding task failed: {}", e)))?
    .map_err(|e| ApiError::Internal(format!("WAV encoding failed: {:#}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"diss-{}.wav\"", run_id),
            ),
        ],
        wav,
    ))
}

/// Build run routes
pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/runs/:run_id", get(get_run))
        .route("/tracks/:run_id", get(get_track))
}
