use anyhow::{Context, Result};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{EngineError, EngineState, ProcessSupervisor, RecognitionEngine, ENGINE_SAMPLE_RATE};
use crate::audio::pcm_to_wav;
use crate::config::EngineConfig;

/// JSON body returned by the inference endpoint.
#[derive(Debug, Deserialize)]
struct InferenceResponse {
    text: String,
}

/// Request/response engine: a `whisper-server` process on a loopback port.
///
/// Each submission POSTs the full buffer snapshot as a self-contained WAV;
/// the response carries one complete transcript for that snapshot.
pub struct ServerEngine {
    config: EngineConfig,
    supervisor: ProcessSupervisor,
    client: reqwest::Client,
    text_tx: mpsc::Sender<String>,
}

impl ServerEngine {
    pub fn new(config: EngineConfig, text_tx: mpsc::Sender<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create engine HTTP client")?;

        Ok(Self {
            config,
            supervisor: ProcessSupervisor::new(),
            client,
            text_tx,
        })
    }

    fn inference_url(&self) -> String {
        format!("http://127.0.0.1:{}/inference", self.config.server.port)
    }

    /// A request error after the process died is a crash, not an I/O blip.
    fn submission_error(&self, e: impl std::fmt::Display) -> EngineError {
        if self.supervisor.state() == EngineState::Crashed {
            EngineError::Crashed
        } else {
            EngineError::Submission(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl RecognitionEngine for ServerEngine {
    async fn start(&self) -> Result<(), EngineError> {
        if !self.supervisor.begin_start() {
            debug!("Engine already running; start is a no-op");
            return Ok(());
        }

        info!(
            "Starting recognition server: {} (model: {}, port: {})",
            self.config.server.binary, self.config.model_path, self.config.server.port
        );

        let mut child = match Command::new(&self.config.server.binary)
            .arg("-m")
            .arg(&self.config.model_path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(self.config.server.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.supervisor.set_state(EngineState::Stopped);
                return Err(EngineError::Startup(format!(
                    "failed to spawn {}: {}",
                    self.config.server.binary, e
                )));
            }
        };

        if let Some(stderr) = child.stderr.take() {
            self.supervisor.spawn_stderr_reader(stderr, None);
        }

        self.supervisor
            .await_startup(
                &mut child,
                Duration::from_secs(self.config.startup_timeout_secs),
            )
            .await?;

        self.supervisor.set_state(EngineState::Running);
        self.supervisor.spawn_exit_watcher(child);

        info!(
            "Recognition server ready on port {}",
            self.config.server.port
        );

        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if self.supervisor.state() == EngineState::Stopped {
            return Ok(());
        }
        info!("Stopping recognition server");
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

        let wav = pcm_to_wav(pcm, ENGINE_SAMPLE_RATE)
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        debug!("Submitting {} byte WAV snapshot to engine", wav.len());

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("temperature", self.config.server.temperature.to_string())
            .text(
                "temperature_inc",
                self.config.server.temperature_inc.to_string(),
            )
            .text("response_format", "json");

        let response = self
            .client
            .post(self.inference_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.submission_error(e))?;

        if !response.status().is_success() {
            return Err(EngineError::Submission(format!(
                "engine returned {}",
                response.status()
            )));
        }

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Submission(e.to_string()))?;

        debug!("Engine transcript: {:?}", body.text);

        // Receiver gone means the session is shutting down; nothing to do.
        let _ = self.text_tx.send(body.text).await;

        Ok(())
    }
}
