//! Recording session management
//!
//! This module provides the `RecordingSession` abstraction that manages:
//! - Engine lifecycle around a recording (start, lazy crash restart, stop)
//! - Audio accumulation and the periodic submission tick
//! - Raw-text stabilization into finalized segments
//! - Live-candidate relay to the UI surface
//! - Session state machine and statistics

mod config;
mod session;
mod stats;

pub use config::SessionConfig;
pub use session::{submit_with_restart, RecordingSession, SessionState};
pub use stats::{LiveUpdate, SessionStats};

use crate::engine::EngineError;
use thiserror::Error;

/// Errors surfaced by the recording pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Container-to-PCM conversion failed for a buffer snapshot.
    #[error("audio transcode failed: {0}")]
    Transcode(String),

    /// A segment write failed. The in-memory candidate is preserved;
    /// retrying is the caller's responsibility.
    #[error("segment write failed: {0}")]
    Persistence(String),

    #[error("audio capture failed: {0}")]
    Capture(String),

    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("no recording session is active")]
    NotRecording,
}
