//! Recognition engine lifecycle and submission.
//!
//! The external speech-recognition engine is a supervised local subprocess,
//! reachable through one capability trait with two interchangeable
//! implementations selected by configuration:
//! - `ServerEngine`: request/response against a loopback HTTP server; each
//!   submission is a self-contained WAV snapshot.
//! - `StreamEngine`: a long-lived process fed raw PCM on stdin, emitting
//!   text lines on stdout.
//!
//! Raw text from either mode is delivered through one mpsc channel to the
//! segment stabilizer, so callers never branch on the mode.

mod server;
mod stream;

pub use server::ServerEngine;
pub use stream::StreamEngine;

use crate::config::{EngineConfig, EngineMode};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, ChildStderr};
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

/// Sample rate the engine wire contract fixes for submitted PCM.
pub const ENGINE_SAMPLE_RATE: u32 = 16_000;

/// Recognition engine process states.
///
/// There is at most one live handle per service instance; the state is
/// mutated only by the owning engine and queried through `state()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Crashed,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The process failed to reach a ready state within the startup window,
    /// or emitted fatal diagnostics before the window elapsed.
    #[error("engine failed to start: {0}")]
    Startup(String),

    /// The process exited unexpectedly mid-session.
    #[error("engine process exited unexpectedly")]
    Crashed,

    /// Submission attempted while the engine is not running.
    #[error("engine is not running")]
    NotRunning,

    /// I/O failure reaching a running engine.
    #[error("failed to reach engine: {0}")]
    Submission(String),
}

/// Capability interface over the recognition engine.
///
/// `submit` takes mono 16kHz i16 PCM; each implementation does its own wire
/// packaging (WAV multipart vs. raw stdin bytes). Text produced by the
/// engine, now or later, arrives on the channel the engine was created with.
#[async_trait::async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Spawn the engine process and wait for it to become ready.
    /// A no-op when the engine is already running.
    async fn start(&self) -> Result<(), EngineError>;

    /// Terminate the engine process. Idempotent.
    async fn stop(&self) -> Result<(), EngineError>;

    /// Current process state.
    fn state(&self) -> EngineState;

    /// Submit audio for recognition.
    async fn submit(&self, pcm: &[i16]) -> Result<(), EngineError>;
}

/// Build the configured engine implementation.
pub fn from_config(
    config: &EngineConfig,
    text_tx: mpsc::Sender<String>,
) -> anyhow::Result<Arc<dyn RecognitionEngine>> {
    Ok(match config.mode {
        EngineMode::Server => Arc::new(ServerEngine::new(config.clone(), text_tx)?),
        EngineMode::Stream => Arc::new(StreamEngine::new(config.clone(), text_tx)),
    })
}

/// Shared process bookkeeping for both engine implementations.
pub(crate) struct ProcessSupervisor {
    state: Arc<Mutex<EngineState>>,
    stopping: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    /// Accumulated stderr output, for startup diagnostics.
    stderr_log: Arc<Mutex<String>>,
}

impl ProcessSupervisor {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::Stopped)),
            stopping: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            stderr_log: Arc::new(Mutex::new(String::new())),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap() = state;
    }

    /// Transition into Starting. Returns false when the engine is already
    /// starting or running (start must be a no-op then).
    pub(crate) fn begin_start(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            EngineState::Starting | EngineState::Running => false,
            _ => {
                *state = EngineState::Starting;
                self.stopping.store(false, Ordering::SeqCst);
                self.stderr_log.lock().unwrap().clear();
                true
            }
        }
    }

    /// Watch stderr, logging lines and retaining them for startup
    /// diagnostics. Lines matching `non_fatal_marker` are noise from normal
    /// operation and are kept out of the retained log.
    pub(crate) fn spawn_stderr_reader(
        &self,
        stderr: ChildStderr,
        non_fatal_marker: Option<&'static str>,
    ) {
        let log = Arc::clone(&self.stderr_log);
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(marker) = non_fatal_marker {
                    if line.contains(marker) {
                        continue;
                    }
                }
                warn!("engine stderr: {}", line);
                let mut log = log.lock().unwrap();
                log.push_str(&line);
                log.push('\n');
            }
        });
    }

    /// Bounded startup window: poll the child until the window elapses.
    /// Early exit or a fatal stderr line fails the start.
    pub(crate) async fn await_startup(
        &self,
        child: &mut Child,
        window: Duration,
    ) -> Result<(), EngineError> {
        let poll = Duration::from_millis(100);
        let mut waited = Duration::ZERO;

        while waited < window {
            tokio::time::sleep(poll).await;
            waited += poll;

            match child.try_wait() {
                Ok(Some(status)) => {
                    let log = self.stderr_log.lock().unwrap().clone();
                    self.set_state(EngineState::Stopped);
                    return Err(EngineError::Startup(format!(
                        "process exited with {} during startup: {}",
                        status,
                        log.trim()
                    )));
                }
                Ok(None) => {}
                Err(e) => {
                    self.set_state(EngineState::Stopped);
                    return Err(EngineError::Startup(format!(
                        "failed to poll engine process: {}",
                        e
                    )));
                }
            }

            let fatal = {
                let log = self.stderr_log.lock().unwrap();
                log.lines().find(|l| l.contains("error:")).map(String::from)
            };
            if let Some(line) = fatal {
                let _ = child.start_kill();
                let _ = child.wait().await;
                self.set_state(EngineState::Stopped);
                return Err(EngineError::Startup(format!(
                    "fatal engine diagnostic during startup: {}",
                    line
                )));
            }
        }

        Ok(())
    }

    /// Own the child for the rest of its life: mark Crashed on unexpected
    /// exit, kill it when `stop()` signals shutdown.
    pub(crate) fn spawn_exit_watcher(&self, mut child: Child) {
        let stopping = Arc::clone(&self.stopping);
        let shutdown = Arc::clone(&self.shutdown);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    status = child.wait() => {
                        if stopping.load(Ordering::SeqCst) {
                            *state.lock().unwrap() = EngineState::Stopped;
                        } else {
                            log_unexpected_exit(&status.ok());
                            *state.lock().unwrap() = EngineState::Crashed;
                        }
                        break;
                    }
                    _ = shutdown.notified() => {
                        // A permit stored by an earlier stop (after the
                        // previous child was already gone) is stale; the
                        // stopping flag says whether this one is real.
                        if !stopping.load(Ordering::SeqCst) {
                            continue;
                        }
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        info!("Engine process terminated");
                        *state.lock().unwrap() = EngineState::Stopped;
                        break;
                    }
                }
            }
        });
    }

    /// Signal shutdown to the exit watcher. Idempotent. `notify_one` stores
    /// a permit, so the signal is not lost if the watcher task has not been
    /// scheduled yet.
    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        self.set_state(EngineState::Stopped);
    }
}

fn log_unexpected_exit(status: &Option<ExitStatus>) {
    match status {
        Some(status) => error!("Engine process exited unexpectedly with {}", status),
        None => error!("Engine process exited unexpectedly"),
    }
}
