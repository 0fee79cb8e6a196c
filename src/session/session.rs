use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::stats::{LiveUpdate, SessionStats};
use super::PipelineError;
use crate::audio::{decode_to_pcm, Accumulator, AudioChunk, CaptureSource};
use crate::engine::{EngineError, EngineState, RecognitionEngine};
use crate::stabilizer::{Stabilizer, StabilizerEvent};
use crate::transcript::{SegmentSource, TranscriptRelay};

/// Recording session states.
///
/// `Idle → Starting → Recording → Stopping → Idle`; the stabilizer and
/// accumulator live inside the pipeline task, which exists only between
/// Starting and Stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// A recording session that manages audio capture, recognition submissions,
/// segment stabilization, and transcript relay.
///
/// One instance per service; `start`/`stop` may be cycled repeatedly and
/// segment indices stay contiguous per note across cycles.
pub struct RecordingSession {
    config: SessionConfig,

    /// Recognition engine (process manager), shared with submission tasks
    engine: Arc<dyn RecognitionEngine>,

    /// Relay assigning indices and persisting finalized segments
    relay: Arc<TranscriptRelay>,

    /// Raw engine text; lent to the pipeline task while recording
    text_rx: Mutex<Option<mpsc::Receiver<String>>>,

    state: StdMutex<SessionState>,

    /// Suppresses stale in-flight engine responses once stop begins
    stopping: Arc<AtomicBool>,

    /// Wakes the pipeline task for the stop sequence
    stop_signal: Arc<Notify>,

    /// Active capture source, kept so stop() can halt it
    capture: Mutex<Option<Box<dyn CaptureSource>>>,

    /// Pipeline task; returns the text receiver when it exits
    pipeline_task: Mutex<Option<JoinHandle<mpsc::Receiver<String>>>>,

    /// Live (unfinalized) candidate, observed by the UI surface
    live_tx: Arc<watch::Sender<LiveUpdate>>,

    started_at: StdMutex<Option<DateTime<Utc>>>,
    note_id: StdMutex<Option<String>>,
    segments_finalized: Arc<AtomicUsize>,
}

impl RecordingSession {
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn RecognitionEngine>,
        text_rx: mpsc::Receiver<String>,
        relay: Arc<TranscriptRelay>,
    ) -> Self {
        let (live_tx, _) = watch::channel(LiveUpdate::default());

        Self {
            config,
            engine,
            relay,
            text_rx: Mutex::new(Some(text_rx)),
            state: StdMutex::new(SessionState::Idle),
            stopping: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            capture: Mutex::new(None),
            pipeline_task: Mutex::new(None),
            live_tx: Arc::new(live_tx),
            started_at: StdMutex::new(None),
            note_id: StdMutex::new(None),
            segments_finalized: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Recording
    }

    /// Watch the live (unfinalized) candidate as it forms.
    pub fn live_updates(&self) -> watch::Receiver<LiveUpdate> {
        self.live_tx.subscribe()
    }

    /// Start recording into `note_id`, pulling audio from `capture`.
    ///
    /// Fails with `EngineError::Startup` (recording does not begin) when the
    /// engine cannot reach a ready state.
    pub async fn start(
        &self,
        note_id: String,
        mut capture: Box<dyn CaptureSource>,
    ) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Idle {
                return Err(PipelineError::AlreadyRecording);
            }
            *state = SessionState::Starting;
        }

        info!("Starting recording session for note {}", note_id);
        self.stopping.store(false, Ordering::SeqCst);

        if let Err(e) = self.engine.start().await {
            error!("Engine failed to start: {}", e);
            *self.state.lock().unwrap() = SessionState::Idle;
            return Err(PipelineError::Engine(e));
        }

        let chunk_rx = match capture.start().await {
            Ok(rx) => rx,
            Err(e) => {
                let _ = self.engine.stop().await;
                *self.state.lock().unwrap() = SessionState::Idle;
                return Err(PipelineError::Capture(e.to_string()));
            }
        };
        *self.capture.lock().await = Some(capture);

        let mut text_rx = match self.text_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                // A previous pipeline still owns the receiver; treat as busy.
                let _ = self.engine.stop().await;
                *self.state.lock().unwrap() = SessionState::Idle;
                return Err(PipelineError::AlreadyRecording);
            }
        };

        // Drop text left over from a previous session's in-flight responses.
        while text_rx.try_recv().is_ok() {}

        *self.note_id.lock().unwrap() = Some(note_id.clone());
        *self.started_at.lock().unwrap() = Some(Utc::now());
        self.segments_finalized.store(0, Ordering::SeqCst);
        let _ = self.live_tx.send(LiveUpdate {
            note_id: Some(note_id.clone()),
            text: String::new(),
            recording: true,
        });

        let pipeline = Pipeline {
            config: self.config.clone(),
            note_id,
            engine: Arc::clone(&self.engine),
            relay: Arc::clone(&self.relay),
            stopping: Arc::clone(&self.stopping),
            stop_signal: Arc::clone(&self.stop_signal),
            live_tx: Arc::clone(&self.live_tx),
            segments_finalized: Arc::clone(&self.segments_finalized),
        };
        let handle = tokio::spawn(pipeline.run(chunk_rx, text_rx));
        *self.pipeline_task.lock().await = Some(handle);

        *self.state.lock().unwrap() = SessionState::Recording;
        info!("Recording session started");

        Ok(())
    }

    /// Stop recording: halt capture, drain the pipeline (flushing a
    /// non-empty candidate exactly once), stop the engine, reset the buffer.
    pub async fn stop(&self) -> Result<SessionStats, PipelineError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Recording {
                return Err(PipelineError::NotRecording);
            }
            *state = SessionState::Stopping;
        }

        info!("Stopping recording session");

        // Stale responses arriving from here on must not re-trigger state
        // changes.
        self.stopping.store(true, Ordering::SeqCst);

        if let Some(mut capture) = self.capture.lock().await.take() {
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop capture: {}", e);
            }
        }

        self.stop_signal.notify_one();
        if let Some(handle) = self.pipeline_task.lock().await.take() {
            match handle.await {
                Ok(text_rx) => {
                    *self.text_rx.lock().await = Some(text_rx);
                }
                Err(e) => error!("Pipeline task panicked: {}", e),
            }
        }

        if let Err(e) = self.engine.stop().await {
            warn!("Failed to stop engine: {}", e);
        }

        let stats = self.stats();
        *self.state.lock().unwrap() = SessionState::Idle;
        info!(
            "Recording session stopped ({} segments finalized)",
            stats.segments_finalized
        );

        Ok(stats)
    }

    /// Current session statistics.
    pub fn stats(&self) -> SessionStats {
        let started_at = *self.started_at.lock().unwrap();
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            is_recording: self.is_recording(),
            note_id: self.note_id.lock().unwrap().clone(),
            started_at,
            duration_secs,
            segments_finalized: self.segments_finalized.load(Ordering::SeqCst),
        }
    }
}

/// Everything the pipeline task needs, detached from the session so the
/// task owns its clones outright.
struct Pipeline {
    config: SessionConfig,
    note_id: String,
    engine: Arc<dyn RecognitionEngine>,
    relay: Arc<TranscriptRelay>,
    stopping: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    live_tx: Arc<watch::Sender<LiveUpdate>>,
    segments_finalized: Arc<AtomicUsize>,
}

impl Pipeline {
    /// The per-session event loop: capture chunks feed the accumulator, a
    /// periodic tick submits buffer snapshots (at most one outstanding), and
    /// raw engine text drives the stabilizer. Returns the text receiver so
    /// the session can lend it to the next recording.
    async fn run(
        self,
        mut chunk_rx: mpsc::Receiver<AudioChunk>,
        mut text_rx: mpsc::Receiver<String>,
    ) -> mpsc::Receiver<String> {
        let mut accumulator = Accumulator::new(self.config.max_buffer_bytes);
        let mut stabilizer = Stabilizer::new();

        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // At most one submission outstanding; its outcome comes back here.
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Result<(), PipelineError>>(1);
        let mut submission_outstanding = false;

        info!("Transcription pipeline started");

        loop {
            tokio::select! {
                _ = self.stop_signal.notified() => break,

                Some(chunk) = chunk_rx.recv() => {
                    accumulator.append(&chunk);
                }

                _ = tick.tick(), if !submission_outstanding => {
                    if !accumulator.has_audio() {
                        continue;
                    }
                    accumulator.begin_submission();
                    submission_outstanding = true;

                    let snapshot = accumulator.snapshot();
                    let engine = Arc::clone(&self.engine);
                    let outcome_tx = outcome_tx.clone();
                    let sample_rate = self.config.sample_rate;
                    tokio::spawn(async move {
                        let result = submit_snapshot(engine.as_ref(), &snapshot, sample_rate).await;
                        let _ = outcome_tx.send(result).await;
                    });
                }

                Some(outcome) = outcome_rx.recv() => {
                    submission_outstanding = false;
                    accumulator.end_submission();
                    if let Err(e) = outcome {
                        // Skip this tick; the next one retries with a larger
                        // accumulated buffer.
                        warn!("Submission skipped: {}", e);
                    }
                }

                Some(raw) = text_rx.recv() => {
                    if self.stopping.load(Ordering::SeqCst) {
                        debug!("Discarding stale transcript after stop");
                        continue;
                    }
                    self.on_raw_text(&raw, &mut stabilizer, &mut accumulator).await;
                }
            }
        }

        // Stop sequence: flush a pending candidate exactly once.
        if let Some(text) = stabilizer.flush() {
            match self
                .relay
                .append(&self.note_id, text, SegmentSource::Mic)
                .await
            {
                Ok(_) => {
                    self.segments_finalized.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => error!("Failed to persist final segment: {}", e),
            }
        }
        accumulator.clear();
        let _ = self.live_tx.send(LiveUpdate::default());

        info!("Transcription pipeline stopped");

        text_rx
    }

    async fn on_raw_text(
        &self,
        raw: &str,
        stabilizer: &mut Stabilizer,
        accumulator: &mut Accumulator,
    ) {
        match stabilizer.observe(raw) {
            StabilizerEvent::Finalize(text) => {
                match self
                    .relay
                    .append(&self.note_id, text.clone(), SegmentSource::Mic)
                    .await
                {
                    Ok(_) => {
                        self.segments_finalized.fetch_add(1, Ordering::SeqCst);
                        accumulator.reset();
                        let _ = self.live_tx.send(LiveUpdate {
                            note_id: Some(self.note_id.clone()),
                            text: String::new(),
                            recording: true,
                        });
                    }
                    Err(e) => {
                        // The candidate survives; a later finalize retries.
                        error!("Segment write failed: {}", e);
                        stabilizer.restore_candidate(text);
                    }
                }
            }
            StabilizerEvent::LiveUpdate(text) => {
                let _ = self.live_tx.send(LiveUpdate {
                    note_id: Some(self.note_id.clone()),
                    text,
                    recording: true,
                });
            }
            StabilizerEvent::Ignored => {}
        }
    }
}

/// Decode a buffer snapshot and submit it to the engine.
async fn submit_snapshot(
    engine: &dyn RecognitionEngine,
    snapshot: &[u8],
    sample_rate: u32,
) -> Result<(), PipelineError> {
    let pcm = decode_to_pcm(snapshot, sample_rate)
        .map_err(|e| PipelineError::Transcode(e.to_string()))?;
    submit_with_restart(engine, &pcm)
        .await
        .map_err(PipelineError::Engine)
}

/// Submit audio, lazily restarting the engine first when a crash was
/// detected. Previously finalized segments are untouched by the restart.
pub async fn submit_with_restart(
    engine: &dyn RecognitionEngine,
    pcm: &[i16],
) -> Result<(), EngineError> {
    if engine.state() == EngineState::Crashed {
        warn!("Engine crashed; restarting before submission");
        engine.start().await?;
    }
    engine.submit(pcm).await
}
