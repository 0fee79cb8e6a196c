use super::state::AppState;
use crate::audio::FileCapture;
use crate::session::{LiveUpdate, PipelineError, SessionStats};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    /// Note the transcription is appended to; generated when omitted
    pub note_id: Option<String>,

    /// Optional capture override: replay this encoded audio file instead of
    /// the configured capture source
    pub capture_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub note_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
/// Start recording into a note
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> impl IntoResponse {
    // Generate or use provided note ID
    let note_id = req
        .note_id
        .unwrap_or_else(|| format!("note-{}", uuid::Uuid::new_v4()));

    info!("Starting recording for note: {}", note_id);

    let capture_path = match req
        .capture_path
        .or_else(|| state.config.audio.capture_path.clone())
    {
        Some(path) => path,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "No capture source configured".to_string(),
                }),
            )
                .into_response();
        }
    };

    let capture = Box::new(FileCapture::new(capture_path));

    match state.session.start(note_id.clone(), capture).await {
        Ok(()) => (
            StatusCode::OK,
            Json(StartRecordingResponse {
                note_id: note_id.clone(),
                status: "recording".to_string(),
                message: format!("Recording started for note {}", note_id),
            }),
        )
            .into_response(),
        Err(PipelineError::AlreadyRecording) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "A recording session is already active".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start recording: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to start recording: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// POST /recording/stop
/// Stop the active recording session
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping recording");

    match state.session.stop().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                status: "stopped".to_string(),
                message: "Recording stopped".to_string(),
                stats,
            }),
        )
            .into_response(),
        Err(PipelineError::NotRecording) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "No recording session is active".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop recording: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to stop recording: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /notes/:note_id/segments
/// Ordered finalized segments for a note (empty list when none exist)
pub async fn get_note_segments(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
) -> impl IntoResponse {
    match state.relay.get(&note_id).await {
        Ok(segments) => (StatusCode::OK, Json(segments)).into_response(),
        Err(e) => {
            error!("Failed to read segments for note {}: {}", note_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to read segments: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /notes/:note_id/live
/// Current unfinalized candidate text for a note
pub async fn get_note_live(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
) -> impl IntoResponse {
    let update = state.live.borrow().clone();

    // The live feed belongs to whichever note is recording; any other note
    // sees an empty, not-recording candidate.
    if update.note_id.as_deref() == Some(note_id.as_str()) {
        (StatusCode::OK, Json(update)).into_response()
    } else {
        (
            StatusCode::OK,
            Json(LiveUpdate {
                note_id: Some(note_id),
                text: String::new(),
                recording: false,
            }),
        )
            .into_response()
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
