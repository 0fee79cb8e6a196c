use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A slice of encoded audio delivered by a capture source.
///
/// The first chunk of a recording carries the container framing (header)
/// needed to decode any prefix of the stream independently.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded audio bytes
    pub bytes: Vec<u8>,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
    /// Whether this is the first chunk of the recording
    pub is_first: bool,
}

/// Audio capture boundary.
///
/// Capture itself is an external collaborator (a browser MediaRecorder, a
/// platform recorder, ...). Implementations push encoded chunks into a
/// channel; the pipeline never pulls.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Start capturing audio.
    ///
    /// Returns a channel receiver that will receive encoded chunks.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>>;

    /// Stop capturing audio.
    async fn stop(&mut self) -> Result<()>;
}

/// Reads an encoded audio file and replays it as a chunked live capture.
///
/// Useful for offline runs and tests: the file is sliced into fixed-size
/// chunks delivered at a fixed cadence, with the first chunk flagged as
/// carrying the container header.
pub struct FileCapture {
    path: PathBuf,
    chunk_bytes: usize,
    chunk_interval_ms: u64,
    running: Arc<AtomicBool>,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_bytes: 16 * 1024,
            chunk_interval_ms: 250,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_chunking(mut self, chunk_bytes: usize, chunk_interval_ms: u64) -> Self {
        self.chunk_bytes = chunk_bytes;
        self.chunk_interval_ms = chunk_interval_ms;
        self
    }
}

#[async_trait::async_trait]
impl CaptureSource for FileCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read capture file {}", self.path.display()))?;

        info!(
            "File capture started: {} ({} bytes, {} byte chunks)",
            self.path.display(),
            bytes.len(),
            self.chunk_bytes
        );

        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(100);
        let chunk_bytes = self.chunk_bytes;
        let interval_ms = self.chunk_interval_ms;
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            for (i, slice) in bytes.chunks(chunk_bytes).enumerate() {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let chunk = AudioChunk {
                    bytes: slice.to_vec(),
                    timestamp_ms: i as u64 * interval_ms,
                    is_first: i == 0,
                };
                if tx.send(chunk).await.is_err() {
                    // Receiver dropped; session is done with us
                    break;
                }
            }
            debug!("File capture drained");
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
