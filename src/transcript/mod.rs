//! Finalized segment persistence and ordered relay.
//!
//! The note store is an external collaborator boundary: durable keyed
//! storage mapping a note id to its ordered segment list. The relay sits in
//! front of it to assign contiguous indices race-free.

mod relay;
mod store;

pub use relay::TranscriptRelay;
pub use store::{JsonNoteStore, NoteStore};

use serde::{Deserialize, Serialize};

/// Where a segment's audio came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentSource {
    Mic,
}

/// A finalized, persisted unit of transcribed text. Immutable once created;
/// belongs to exactly one note's ordered segment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Position in the note's segment list; contiguous from 0.
    pub index: usize,
    pub text: String,
    pub source: SegmentSource,
}
