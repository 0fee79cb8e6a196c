//! HTTP API server for external control (the note UI)
//!
//! This module provides a REST API for controlling recording sessions:
//! - POST /recording/start - Start recording into a note
//! - POST /recording/stop - Stop the active recording
//! - GET /notes/:note_id/segments - Ordered finalized segments
//! - GET /notes/:note_id/live - Current unfinalized candidate
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
