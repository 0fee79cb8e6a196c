use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

use super::TranscriptSegment;

/// Durable keyed storage for note transcripts: `note_id → ordered segments`.
/// Survives process restarts.
#[async_trait::async_trait]
pub trait NoteStore: Send + Sync {
    async fn append_segment(&self, note_id: &str, segment: TranscriptSegment) -> Result<()>;

    /// Ordered segment list for a note; empty when the note has none.
    async fn get_segments(&self, note_id: &str) -> Result<Vec<TranscriptSegment>>;
}

/// Note store backed by a single JSON file.
///
/// The whole map is rewritten on every append via a temp file + rename, so a
/// crash mid-write never leaves a corrupt store behind.
pub struct JsonNoteStore {
    path: PathBuf,
    notes: Mutex<HashMap<String, Vec<TranscriptSegment>>>,
}

impl JsonNoteStore {
    /// Open the store, loading any existing contents. The store directory is
    /// created if it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }

        let notes = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt segment store at {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read segment store {}", path.display()))
            }
        };

        info!("Segment store opened: {}", path.display());

        Ok(Self {
            path,
            notes: Mutex::new(notes),
        })
    }

    async fn persist(&self, notes: &HashMap<String, Vec<TranscriptSegment>>) -> Result<()> {
        let json = serde_json::to_vec_pretty(notes).context("Failed to serialize segments")?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl NoteStore for JsonNoteStore {
    async fn append_segment(&self, note_id: &str, segment: TranscriptSegment) -> Result<()> {
        let mut notes = self.notes.lock().await;
        notes
            .entry(note_id.to_string())
            .or_default()
            .push(segment);

        if let Err(e) = self.persist(&notes).await {
            // Roll the push back: memory must never show a segment the
            // caller was told failed, or the caller's retry duplicates it.
            if let Some(segments) = notes.get_mut(note_id) {
                segments.pop();
                if segments.is_empty() {
                    notes.remove(note_id);
                }
            }
            return Err(e);
        }

        Ok(())
    }

    async fn get_segments(&self, note_id: &str) -> Result<Vec<TranscriptSegment>> {
        let notes = self.notes.lock().await;
        Ok(notes.get(note_id).cloned().unwrap_or_default())
    }
}
