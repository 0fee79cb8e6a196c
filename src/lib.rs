pub mod audio;
pub mod config;
pub mod engine;
pub mod http;
pub mod session;
pub mod stabilizer;
pub mod transcript;

pub use audio::{Accumulator, AudioChunk, CaptureSource, FileCapture};
pub use config::{Config, EngineMode};
pub use engine::{EngineError, EngineState, RecognitionEngine, ServerEngine, StreamEngine};
pub use http::{create_router, AppState};
pub use session::{
    LiveUpdate, PipelineError, RecordingSession, SessionConfig, SessionState, SessionStats,
};
pub use stabilizer::{Stabilizer, StabilizerEvent};
pub use transcript::{
    JsonNoteStore, NoteStore, SegmentSource, TranscriptRelay, TranscriptSegment,
};
