//! Audio configuration and errors

use serde::Deserialize;
use thiserror::Error;

/// Sample rate the streaming pipeline records at
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Recording configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(AudioError::InvalidConfig(*self));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("invalid audio configuration: {0:?}")]
    InvalidConfig(AudioConfig),

    #[error("audio source failed: {0}")]
    Source(String),

    #[error("audio source already running")]
    AlreadyRunning,

    #[error("WAV output: {0}")]
    Wav(#[from] hound::Error),
}
