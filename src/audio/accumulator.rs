use tracing::{debug, warn};

use super::capture::AudioChunk;

/// Growing buffer of encoded audio for the segment in progress.
///
/// The first chunk of a recording carries the container header; the header
/// is retained separately so that after a reset the buffer is still
/// independently decodable. The buffer only grows between resets, which lets
/// the same snapshot be resubmitted whole while audio keeps arriving.
pub struct Accumulator {
    header: Option<Vec<u8>>,
    buf: Vec<u8>,
    max_bytes: usize,
    /// A submission built from a snapshot of this buffer is outstanding.
    in_flight: bool,
    /// Buffer length when a mid-flight reset was requested. Bytes up to the
    /// mark are discarded when the deferred reset applies; bytes appended
    /// after it belong to the next segment and survive.
    reset_mark: Option<usize>,
    dropped_bytes: usize,
}

impl Accumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            header: None,
            buf: Vec::new(),
            max_bytes,
            in_flight: false,
            reset_mark: None,
            dropped_bytes: 0,
        }
    }

    /// Append an encoded chunk. The first chunk of the session is also
    /// retained as the container header.
    pub fn append(&mut self, chunk: &AudioChunk) {
        if chunk.is_first && self.header.is_none() {
            self.header = Some(chunk.bytes.clone());
        }

        if self.buf.len() + chunk.bytes.len() > self.max_bytes {
            self.dropped_bytes += chunk.bytes.len();
            warn!(
                "Segment buffer cap reached ({} bytes); dropping chunk of {} bytes until reset",
                self.max_bytes,
                chunk.bytes.len()
            );
            return;
        }

        self.buf.extend_from_slice(&chunk.bytes);
    }

    /// Read-only copy of the current buffer. Does not mutate state; safe to
    /// call repeatedly while audio keeps arriving.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.clone()
    }

    /// Whether the buffer holds any audio beyond (at most) the header.
    pub fn has_audio(&self) -> bool {
        let header_len = self.header.as_ref().map(|h| h.len()).unwrap_or(0);
        self.buf.len() > header_len
    }

    /// Mark that a submission built from the current snapshot is outstanding.
    /// Resets requested while in flight are deferred to `end_submission`.
    pub fn begin_submission(&mut self) {
        self.in_flight = true;
    }

    /// The outstanding submission completed (successfully or not). Applies a
    /// reset that was deferred while the submission was in flight.
    pub fn end_submission(&mut self) {
        self.in_flight = false;
        if let Some(mark) = self.reset_mark.take() {
            self.apply_reset(mark);
        }
    }

    /// Discard the accumulated audio, restoring the buffer to header-only
    /// (or empty, if no header was captured yet). While a snapshot
    /// submission is outstanding the reset is deferred: the current length
    /// is marked, and only bytes up to the mark are discarded when the
    /// submission ends, so audio arriving mid-flight is never lost.
    pub fn reset(&mut self) {
        if self.in_flight {
            debug!("Reset requested mid-submission; deferring");
            self.reset_mark = Some(self.buf.len());
            return;
        }
        let len = self.buf.len();
        self.apply_reset(len);
    }

    /// Full reset at session end: clears the header too, so the next
    /// recording captures fresh container framing.
    pub fn clear(&mut self) {
        self.header = None;
        self.buf.clear();
        self.in_flight = false;
        self.reset_mark = None;
        self.dropped_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard bytes up to `mark`, keeping the header and anything appended
    /// after the mark.
    fn apply_reset(&mut self, mark: usize) {
        let tail = self.buf.split_off(mark);
        self.buf.clear();
        if let Some(header) = &self.header {
            self.buf.extend_from_slice(header);
        }
        self.buf.extend_from_slice(&tail);
        self.dropped_bytes = 0;
        debug!("Segment buffer reset ({} bytes retained)", self.buf.len());
    }
}
