use std::time::Duration;

/// Configuration for a recording session's pipeline.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between buffer-snapshot submissions while recording.
    pub tick_interval: Duration,

    /// Sample rate audio is decoded to before submission (the engine
    /// contract expects 16kHz mono).
    pub sample_rate: u32,

    /// Cap on the growing segment buffer.
    pub max_buffer_bytes: usize,
}

impl SessionConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.session.tick_interval_ms),
            sample_rate: config.audio.sample_rate,
            max_buffer_bytes: config.audio.max_buffer_bytes,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(2000),
            sample_rate: 16000, // Whisper expects 16kHz
            max_buffer_bytes: 16 * 1024 * 1024,
        }
    }
}
