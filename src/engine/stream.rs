use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{EngineError, EngineState, ProcessSupervisor, RecognitionEngine};
use crate::config::EngineConfig;

/// Diagnostic the stream binary emits when a step window holds too little
/// audio. Normal operation, not an error.
const AUDIO_TOO_SHORT_MARKER: &str = "audio too short";

/// Streaming engine: one long-lived process consuming raw 16-bit PCM mono
/// 16kHz on stdin and emitting plain-text lines on stdout per step.
///
/// Because the session resubmits the whole growing buffer each tick, the
/// engine tracks how many samples it has already written and pipes only the
/// unseen suffix. A shrinking buffer (accumulator reset) rewinds the cursor.
pub struct StreamEngine {
    config: EngineConfig,
    supervisor: ProcessSupervisor,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    written_samples: Mutex<usize>,
    text_tx: mpsc::Sender<String>,
}

impl StreamEngine {
    pub fn new(config: EngineConfig, text_tx: mpsc::Sender<String>) -> Self {
        Self {
            config,
            supervisor: ProcessSupervisor::new(),
            stdin: tokio::sync::Mutex::new(None),
            written_samples: Mutex::new(0),
            text_tx,
        }
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for StreamEngine {
    async fn start(&self) -> Result<(), EngineError> {
        if !self.supervisor.begin_start() {
            debug!("Engine already running; start is a no-op");
            return Ok(());
        }

        info!(
            "Starting recognition stream: {} (model: {}, step: {}ms, length: {}ms)",
            self.config.stream.binary,
            self.config.model_path,
            self.config.stream.step_ms,
            self.config.stream.length_ms
        );

        let mut child = match Command::new(&self.config.stream.binary)
            .arg("-m")
            .arg(&self.config.model_path)
            .arg("-t")
            .arg(self.config.stream.threads.to_string())
            .arg("--step")
            .arg(self.config.stream.step_ms.to_string())
            .arg("--length")
            .arg(self.config.stream.length_ms.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.supervisor.set_state(EngineState::Stopped);
                return Err(EngineError::Startup(format!(
                    "failed to spawn {}: {}",
                    self.config.stream.binary, e
                )));
            }
        };

        if let Some(stderr) = child.stderr.take() {
            self.supervisor
                .spawn_stderr_reader(stderr, Some(AUDIO_TOO_SHORT_MARKER));
        }

        // Forward stdout lines to the stabilizer as they arrive.
        if let Some(stdout) = child.stdout.take() {
            let text_tx = self.text_tx.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("Engine transcript line: {:?}", line);
                    if text_tx.send(line).await.is_err() {
                        break;
                    }
                }
                debug!("Engine stdout closed");
            });
        }

        let stdin = child.stdin.take();

        self.supervisor
            .await_startup(
                &mut child,
                Duration::from_secs(self.config.startup_timeout_secs),
            )
            .await?;

        *self.stdin.lock().await = stdin;
        *self.written_samples.lock().unwrap() = 0;
        self.supervisor.set_state(EngineState::Running);
        self.supervisor.spawn_exit_watcher(child);

        info!("Recognition stream ready");

        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if self.supervisor.state() == EngineState::Stopped {
            return Ok(());
        }
        info!("Stopping recognition stream");
        // Dropping stdin signals end-of-audio before the kill.
        self.stdin.lock().await.take();
        *self.written_samples.lock().unwrap() = 0;
        self.supervisor.request_stop();
        Ok(())
    }

    fn state(&self) -> EngineState {
        self.supervisor.state()
    }

    async fn submit(&self, pcm: &[i16]) -> Result<(), EngineError> {
        match self.supervisor.state() {
            EngineState::Running => {}
            EngineState::Crashed => return Err(EngineError::Crashed),
            _ => return Err(EngineError::NotRunning),
        }

        // Only the suffix this process hasn't seen yet goes down the pipe.
        let start = {
            let mut written = self.written_samples.lock().unwrap();
            let start = if pcm.len() < *written { 0 } else { *written };
            *written = pcm.len();
            start
        };

        let delta = &pcm[start..];
        if delta.is_empty() {
            return Ok(());
        }

        let mut bytes = Vec::with_capacity(delta.len() * 2);
        for &sample in delta {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        debug!("Piping {} new PCM samples to engine", delta.len());

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(EngineError::NotRunning)?;

        if let Err(e) = stdin.write_all(&bytes).await {
            return Err(self.pipe_error(e));
        }
        if let Err(e) = stdin.flush().await {
            return Err(self.pipe_error(e));
        }

        Ok(())
    }
}

impl StreamEngine {
    /// A broken pipe normally means the process died under us.
    fn pipe_error(&self, e: std::io::Error) -> EngineError {
        if self.supervisor.state() == EngineState::Crashed {
            EngineError::Crashed
        } else {
            EngineError::Submission(e.to_string())
        }
    }
}
