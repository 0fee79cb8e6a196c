use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether recording is currently active
    pub is_recording: bool,

    /// Note the session targets (None when idle)
    pub note_id: Option<String>,

    /// When the recording started
    pub started_at: Option<DateTime<Utc>>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Segments finalized during this session
    pub segments_finalized: usize,
}

/// The current unfinalized candidate, relayed to the UI as it forms.
///
/// Not persisted; the finalized history lives in the note store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveUpdate {
    /// Note the candidate belongs to (None when no session is active)
    pub note_id: Option<String>,

    /// Candidate text (empty right after a finalize or when idle)
    pub text: String,

    /// Whether a recording session is active
    pub recording: bool,
}
