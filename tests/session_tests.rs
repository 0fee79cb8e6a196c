// Integration tests for the recording session: the state machine around
// start/stop, stop-flush of a pending candidate, lazy crash restart, and
// suppression of stale engine text across session cycles.
//
// The recognition engine is scripted (no subprocess) and raw text is driven
// through the same channel a real engine would use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use note_scribe::audio::{pcm_to_wav, AudioChunk, CaptureSource};
use note_scribe::engine::{EngineError, EngineState, RecognitionEngine};
use note_scribe::session::{
    submit_with_restart, LiveUpdate, PipelineError, RecordingSession, SessionConfig, SessionState,
};
use note_scribe::transcript::{JsonNoteStore, TranscriptRelay};

// ============================================================================
// Test doubles
// ============================================================================

/// Engine that tracks lifecycle calls without spawning anything.
struct ScriptedEngine {
    state: Mutex<EngineState>,
    fail_start: bool,
    fail_submit: bool,
    submit_delay: Option<Duration>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    submissions: AtomicUsize,
}

impl ScriptedEngine {
    fn new(initial: EngineState) -> Self {
        Self {
            state: Mutex::new(initial),
            fail_start: false,
            fail_submit: false,
            submit_delay: None,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new(EngineState::Stopped)
        }
    }

    fn failing_submit() -> Self {
        Self {
            fail_submit: true,
            ..Self::new(EngineState::Stopped)
        }
    }

    fn slow_submit(delay: Duration) -> Self {
        Self {
            submit_delay: Some(delay),
            ..Self::new(EngineState::Stopped)
        }
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for ScriptedEngine {
    async fn start(&self) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(EngineError::Startup("scripted failure".to_string()));
        }
        *self.state.lock().unwrap() = EngineState::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = EngineState::Stopped;
        Ok(())
    }

    fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    async fn submit(&self, _pcm: &[i16]) -> Result<(), EngineError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_submit {
            return Err(EngineError::Submission("scripted failure".to_string()));
        }
        Ok(())
    }
}

/// Capture source that delivers no chunks; the tests drive raw text instead.
struct NullCapture {
    chunk_tx: Option<mpsc::Sender<AudioChunk>>,
    chunk_rx: Option<mpsc::Receiver<AudioChunk>>,
}

impl NullCapture {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(8);
        Self {
            chunk_tx: Some(tx),
            chunk_rx: Some(rx),
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for NullCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>> {
        Ok(self.chunk_rx.take().expect("capture started twice"))
    }

    async fn stop(&mut self) -> Result<()> {
        self.chunk_tx.take();
        Ok(())
    }
}

/// Capture source that delivers pre-built bytes split into a header chunk
/// and a body chunk, so the submission tick has real audio to snapshot.
struct ChunkCapture {
    chunks: Vec<Vec<u8>>,
    chunk_tx: Option<mpsc::Sender<AudioChunk>>,
    chunk_rx: Option<mpsc::Receiver<AudioChunk>>,
}

impl ChunkCapture {
    fn new(bytes: Vec<u8>) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let split = bytes.len().min(44); // WAV header size
        Self {
            chunks: vec![bytes[..split].to_vec(), bytes[split..].to_vec()],
            chunk_tx: Some(tx),
            chunk_rx: Some(rx),
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for ChunkCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>> {
        let tx = self.chunk_tx.clone().expect("capture stopped");
        for (i, bytes) in self.chunks.iter().enumerate() {
            tx.send(AudioChunk {
                bytes: bytes.clone(),
                timestamp_ms: i as u64,
                is_first: i == 0,
            })
            .await?;
        }
        Ok(self.chunk_rx.take().expect("capture started twice"))
    }

    async fn stop(&mut self) -> Result<()> {
        self.chunk_tx.take();
        Ok(())
    }
}

struct Harness {
    session: RecordingSession,
    relay: Arc<TranscriptRelay>,
    engine: Arc<ScriptedEngine>,
    text_tx: mpsc::Sender<String>,
    _dir: TempDir,
}

async fn harness_with(engine: ScriptedEngine) -> Result<Harness> {
    let dir = TempDir::new()?;
    let store = JsonNoteStore::open(dir.path().join("segments.json")).await?;
    let relay = Arc::new(TranscriptRelay::new(Arc::new(store)));
    let engine = Arc::new(engine);
    let (text_tx, text_rx) = mpsc::channel(32);

    let config = SessionConfig {
        tick_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let engine_dyn: Arc<dyn RecognitionEngine> = engine.clone();
    let session = RecordingSession::new(config, engine_dyn, text_rx, Arc::clone(&relay));

    Ok(Harness {
        session,
        relay,
        engine,
        text_tx,
        _dir: dir,
    })
}

async fn harness() -> Result<Harness> {
    harness_with(ScriptedEngine::new(EngineState::Stopped)).await
}

/// Wait until the live channel reports an update matching `pred`.
async fn wait_for_live(
    rx: &mut watch::Receiver<LiveUpdate>,
    pred: impl Fn(&LiveUpdate) -> bool,
) -> LiveUpdate {
    let wait = async {
        loop {
            if pred(&rx.borrow()) {
                return rx.borrow().clone();
            }
            rx.changed().await.expect("live channel closed");
        }
    };
    timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for live update")
}

/// Poll until `pred` holds.
async fn wait_until(pred: impl Fn() -> bool) {
    let wait = async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for condition")
}

/// Poll the relay until `note_id` holds at least `count` segments.
async fn wait_for_segments(
    relay: &TranscriptRelay,
    note_id: &str,
    count: usize,
) -> Result<Vec<note_scribe::transcript::TranscriptSegment>> {
    let wait = async {
        loop {
            let segments = relay.get(note_id).await?;
            if segments.len() >= count {
                return Ok(segments);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for segments")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_start_failure_leaves_session_idle() -> Result<()> {
    let h = harness_with(ScriptedEngine::failing()).await?;

    let err = h
        .session
        .start("note-1".to_string(), Box::new(NullCapture::new()))
        .await
        .expect_err("Start should surface the engine failure");

    assert!(matches!(
        err,
        PipelineError::Engine(EngineError::Startup(_))
    ));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.session.is_recording());

    Ok(())
}

#[tokio::test]
async fn test_double_start_is_rejected() -> Result<()> {
    let h = harness().await?;

    h.session
        .start("note-1".to_string(), Box::new(NullCapture::new()))
        .await?;
    let err = h
        .session
        .start("note-2".to_string(), Box::new(NullCapture::new()))
        .await
        .expect_err("Second start must be rejected");
    assert!(matches!(err, PipelineError::AlreadyRecording));

    h.session.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_without_recording_is_rejected() -> Result<()> {
    let h = harness().await?;

    let err = h.session.stop().await.expect_err("Nothing to stop");
    assert!(matches!(err, PipelineError::NotRecording));

    Ok(())
}

#[tokio::test]
async fn test_stop_flushes_pending_candidate_once() -> Result<()> {
    // Mid-dictation stop: the unfinalized candidate is persisted exactly
    // once, the engine is stopped, and the session returns to idle.
    let h = harness().await?;
    let mut live = h.session.live_updates();

    h.session
        .start("note-1".to_string(), Box::new(NullCapture::new()))
        .await?;
    assert_eq!(h.session.state(), SessionState::Recording);

    h.text_tx.send("partial text".to_string()).await?;
    wait_for_live(&mut live, |u| u.text == "partial text").await;

    let stats = h.session.stop().await?;

    assert_eq!(stats.segments_finalized, 1);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.engine.stops.load(Ordering::SeqCst), 1);

    let segments = h.relay.get("note-1").await?;
    assert_eq!(segments.len(), 1, "Flushed exactly once, no duplicate");
    assert_eq!(segments[0].index, 0);
    assert_eq!(segments[0].text, "partial text");

    let after = wait_for_live(&mut live, |u| !u.recording).await;
    assert_eq!(after, LiveUpdate::default(), "Live candidate cleared on stop");

    Ok(())
}

#[tokio::test]
async fn test_blank_marker_finalizes_mid_session() -> Result<()> {
    let h = harness().await?;

    h.session
        .start("note-1".to_string(), Box::new(NullCapture::new()))
        .await?;

    h.text_tx.send("foo".to_string()).await?;
    h.text_tx.send("foo bar".to_string()).await?;
    h.text_tx.send("[BLANK_AUDIO]".to_string()).await?;

    let segments = wait_for_segments(&h.relay, "note-1", 1).await?;
    assert_eq!(segments[0].text, "foo bar");
    assert!(h.session.is_recording(), "Finalize does not end the session");

    let stats = h.session.stop().await?;
    assert_eq!(
        stats.segments_finalized, 1,
        "Stop flush adds nothing when no candidate is pending"
    );
    assert_eq!(h.relay.get("note-1").await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_stale_text_is_dropped_between_sessions() -> Result<()> {
    let h = harness().await?;
    let mut live = h.session.live_updates();

    h.session
        .start("note-1".to_string(), Box::new(NullCapture::new()))
        .await?;
    h.text_tx.send("first session".to_string()).await?;
    wait_for_live(&mut live, |u| u.text == "first session").await;
    h.session.stop().await?;

    // An in-flight engine response lands after stop; it must not leak into
    // the next session.
    h.text_tx.send("stale line".to_string()).await?;

    h.session
        .start("note-2".to_string(), Box::new(NullCapture::new()))
        .await?;
    h.text_tx.send("fresh".to_string()).await?;

    let update = wait_for_live(&mut live, |u| !u.text.is_empty()).await;
    assert_eq!(update.text, "fresh", "Stale line was drained, not observed");
    assert_eq!(update.note_id.as_deref(), Some("note-2"));

    // Stop flushes "fresh"; "stale line" never persists anywhere.
    h.session.stop().await?;
    let segments = h.relay.get("note-2").await?;
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].text, "fresh");

    Ok(())
}

#[tokio::test]
async fn test_segment_indices_continue_across_sessions() -> Result<()> {
    let h = harness().await?;
    let mut live = h.session.live_updates();

    h.session
        .start("note-1".to_string(), Box::new(NullCapture::new()))
        .await?;
    h.text_tx.send("segment one".to_string()).await?;
    wait_for_live(&mut live, |u| u.text == "segment one").await;
    h.session.stop().await?;

    h.session
        .start("note-1".to_string(), Box::new(NullCapture::new()))
        .await?;
    h.text_tx.send("segment two".to_string()).await?;
    wait_for_live(&mut live, |u| u.text == "segment two").await;
    h.session.stop().await?;

    let segments = h.relay.get("note-1").await?;
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].index, 0);
    assert_eq!(segments[1].index, 1, "Indices continue across stop/start");

    Ok(())
}

#[tokio::test]
async fn test_failed_submission_skips_tick_and_recording_continues() -> Result<()> {
    // A submission failure is logged and skipped; the next tick retries
    // with the (larger) buffer and the session never leaves Recording.
    let h = harness_with(ScriptedEngine::failing_submit()).await?;
    let mut live = h.session.live_updates();

    let wav = pcm_to_wav(&vec![0i16; 1600], 16000)?;
    h.session
        .start("note-1".to_string(), Box::new(ChunkCapture::new(wav)))
        .await?;

    wait_until(|| h.engine.submissions.load(Ordering::SeqCst) >= 2).await;
    assert!(
        h.session.is_recording(),
        "Per-tick failures do not end the session"
    );

    // Raw text still drives the stabilizer while submissions fail.
    h.text_tx.send("still dictating".to_string()).await?;
    wait_for_live(&mut live, |u| u.text == "still dictating").await;

    let stats = h.session.stop().await?;
    assert_eq!(stats.segments_finalized, 1);

    Ok(())
}

#[tokio::test]
async fn test_undecodable_audio_skips_tick_and_recording_continues() -> Result<()> {
    // A transcode failure skips the tick before the engine is ever reached.
    let h = harness().await?;

    let garbage = b"not an audio container at all, just text long enough to look like audio".to_vec();
    h.session
        .start("note-1".to_string(), Box::new(ChunkCapture::new(garbage)))
        .await?;

    // Let several ticks fire against the undecodable buffer.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.session.is_recording());
    assert_eq!(
        h.engine.submissions.load(Ordering::SeqCst),
        0,
        "Nothing reaches the engine when transcode fails"
    );

    let stats = h.session.stop().await?;
    assert_eq!(stats.segments_finalized, 0);

    Ok(())
}

#[tokio::test]
async fn test_stop_with_inflight_submission_does_not_double_finalize() -> Result<()> {
    // Stop while a submission is still awaiting the engine: the candidate is
    // flushed exactly once and the late outcome changes nothing.
    let h = harness_with(ScriptedEngine::slow_submit(Duration::from_millis(400))).await?;
    let mut live = h.session.live_updates();

    let wav = pcm_to_wav(&vec![0i16; 1600], 16000)?;
    h.session
        .start("note-1".to_string(), Box::new(ChunkCapture::new(wav)))
        .await?;

    wait_until(|| h.engine.submissions.load(Ordering::SeqCst) >= 1).await;

    h.text_tx.send("partial text".to_string()).await?;
    wait_for_live(&mut live, |u| u.text == "partial text").await;

    let stats = h.session.stop().await?;
    assert_eq!(stats.segments_finalized, 1);

    let segments = h.relay.get("note-1").await?;
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].text, "partial text");

    // The in-flight submission resolves after stop; nothing else lands.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.relay.get("note-1").await?.len(), 1);
    assert_eq!(h.session.state(), SessionState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_lazy_restart_after_crash() -> Result<()> {
    // A crashed engine is restarted on the next submission, transparently
    // to the caller; previously finalized segments are unaffected.
    let engine = ScriptedEngine::new(EngineState::Crashed);

    submit_with_restart(&engine, &[0i16; 160]).await?;

    assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
    assert_eq!(engine.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state(), EngineState::Running);

    Ok(())
}

#[tokio::test]
async fn test_running_engine_is_not_restarted() -> Result<()> {
    let engine = ScriptedEngine::new(EngineState::Running);

    submit_with_restart(&engine, &[0i16; 160]).await?;

    assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
    assert_eq!(engine.submissions.load(Ordering::SeqCst), 1);

    Ok(())
}
