use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub session: SessionTickConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Audio pipeline settings.
///
/// The recognition engine expects mono 16kHz; captured audio is converted
/// to this format before submission.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Cap on the growing segment buffer. Chunks arriving past the cap are
    /// dropped (with a warning) until the next reset.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// Default capture source: an encoded audio file replayed as a live
    /// chunk stream. A start request may override it.
    #[serde(default)]
    pub capture_path: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            max_buffer_bytes: default_max_buffer_bytes(),
            capture_path: None,
        }
    }
}

/// Which recognition engine integration to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Loopback HTTP server: each tick submits the full buffer snapshot.
    Server,
    /// Long-lived stream process fed raw PCM on stdin.
    Stream,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub mode: EngineMode,
    /// Path to the speech-recognition model file.
    pub model_path: String,
    /// How long a freshly spawned engine gets to reach a ready state.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default)]
    pub server: ServerEngineConfig,
    #[serde(default)]
    pub stream: StreamEngineConfig,
}

/// Settings for the request/response engine (`whisper-server`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEngineConfig {
    #[serde(default = "default_server_binary")]
    pub binary: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_temperature_inc")]
    pub temperature_inc: f32,
}

impl Default for ServerEngineConfig {
    fn default() -> Self {
        Self {
            binary: default_server_binary(),
            port: default_server_port(),
            temperature: default_temperature(),
            temperature_inc: default_temperature_inc(),
        }
    }
}

/// Settings for the streaming engine (`whisper-stream`).
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEngineConfig {
    #[serde(default = "default_stream_binary")]
    pub binary: String,
    #[serde(default = "default_threads")]
    pub threads: u16,
    /// Step size in milliseconds between emitted lines.
    #[serde(default = "default_step_ms")]
    pub step_ms: u32,
    /// Audio window length in milliseconds.
    #[serde(default = "default_length_ms")]
    pub length_ms: u32,
}

impl Default for StreamEngineConfig {
    fn default() -> Self {
        Self {
            binary: default_stream_binary(),
            threads: default_threads(),
            step_ms: default_step_ms(),
            length_ms: default_length_ms(),
        }
    }
}

/// Submission cadence while a session is recording.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionTickConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for SessionTickConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the JSON segment store file.
    pub path: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

fn default_sample_rate() -> u32 {
    16000 // Whisper expects 16kHz
}

fn default_channels() -> u16 {
    1 // Mono
}

fn default_max_buffer_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_startup_timeout_secs() -> u64 {
    5
}

fn default_server_binary() -> String {
    "whisper-server".to_string()
}

fn default_server_port() -> u16 {
    9000
}

fn default_temperature() -> f32 {
    0.0
}

fn default_temperature_inc() -> f32 {
    0.2
}

fn default_stream_binary() -> String {
    "whisper-stream".to_string()
}

fn default_threads() -> u16 {
    4
}

fn default_step_ms() -> u32 {
    3000
}

fn default_length_ms() -> u32 {
    10000
}

fn default_tick_interval_ms() -> u64 {
    2000
}
