use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::{NoteStore, SegmentSource, TranscriptSegment};

/// Assigns monotonic segment indices and persists finalized segments.
///
/// Appends for one note are serialized through a per-note async mutex so
/// concurrent finalize events can never produce duplicate or skipped
/// indices; indices are always `count of existing segments` at append time.
pub struct TranscriptRelay {
    store: Arc<dyn NoteStore>,
    note_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TranscriptRelay {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self {
            store,
            note_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Persist `text` as the next segment of `note_id` and return the full
    /// updated ordered list.
    pub async fn append(
        &self,
        note_id: &str,
        text: String,
        source: SegmentSource,
    ) -> Result<Vec<TranscriptSegment>> {
        let lock = self.note_lock(note_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(note_id, text, source).await
        };
        self.release_note_lock(note_id, &lock).await;
        result
    }

    async fn append_locked(
        &self,
        note_id: &str,
        text: String,
        source: SegmentSource,
    ) -> Result<Vec<TranscriptSegment>> {
        let existing = self.store.get_segments(note_id).await?;
        let segment = TranscriptSegment {
            index: existing.len(),
            text,
            source,
        };

        info!(
            "Appending segment {} to note {}: {:?}",
            segment.index, note_id, segment.text
        );

        self.store.append_segment(note_id, segment).await?;
        self.store.get_segments(note_id).await
    }

    /// Ordered segment list for a note (empty when none exist).
    pub async fn get(&self, note_id: &str) -> Result<Vec<TranscriptSegment>> {
        self.store.get_segments(note_id).await
    }

    async fn note_lock(&self, note_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.note_locks.lock().await;
        Arc::clone(
            locks
                .entry(note_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the map entry once no other appender holds the lock, so the map
    /// does not grow with every note ever recorded. A waiter already past
    /// `note_lock` holds its own Arc and keeps the entry alive.
    async fn release_note_lock(&self, note_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.note_locks.lock().await;
        // 2 = the map's handle plus ours
        if Arc::strong_count(lock) == 2 {
            locks.remove(note_id);
        }
    }
}
