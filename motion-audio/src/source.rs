//! Audio source contract and an in-process recorder

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clamping::f32_to_pcm16;
use crate::types::{AudioConfig, AudioError};

/// A recorder the streaming pipeline starts and stops with the video.
///
/// `audio_data` returns interleaved PCM16 captured between `start` and
/// `stop`, at the rate and channel count passed to `start`.
pub trait AudioSource: Send {
    fn start(&mut self, sample_rate: u32, channels: u16) -> Result<(), AudioError>;

    fn stop(&mut self);

    fn audio_data(&self) -> Vec<i16>;

    /// Channels actually delivered; hosts that cannot honour the request override this
    fn channels(&self) -> u16 {
        1
    }
}

struct Shared {
    running: AtomicBool,
    config: Mutex<AudioConfig>,
    samples: Mutex<Vec<i16>>,
}

/// Source fed by a capture callback through [`AudioFeed`] handles
pub struct BufferedAudioSource {
    shared: Arc<Shared>,
}

/// Cloneable producer side of a [`BufferedAudioSource`]
#[derive(Clone)]
pub struct AudioFeed {
    shared: Arc<Shared>,
}

impl BufferedAudioSource {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                config: Mutex::new(AudioConfig::default()),
                samples: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn feed(&self) -> AudioFeed {
        AudioFeed {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> AudioConfig {
        *self.shared.config.lock()
    }
}

impl Default for BufferedAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for BufferedAudioSource {
    fn start(&mut self, sample_rate: u32, channels: u16) -> Result<(), AudioError> {
        let config = AudioConfig {
            sample_rate,
            channels,
        };
        config.validate()?;
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(AudioError::AlreadyRunning);
        }
        *self.shared.config.lock() = config;
        self.shared.samples.lock().clear();
        log::info!("Audio recording started ({} Hz, {} ch)", sample_rate, channels);
        Ok(())
    }

    fn stop(&mut self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            log::info!(
                "Audio recording stopped ({} samples)",
                self.shared.samples.lock().len()
            );
        }
    }

    fn audio_data(&self) -> Vec<i16> {
        self.shared.samples.lock().clone()
    }

    fn channels(&self) -> u16 {
        self.config().channels
    }
}

impl AudioFeed {
    /// Append PCM16 samples; dropped unless the source is recording
    pub fn push_pcm16(&self, samples: &[i16]) -> bool {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        self.shared.samples.lock().extend_from_slice(samples);
        true
    }

    /// Append float samples, clamped and converted to PCM16
    pub fn push_f32(&self, samples: &[f32]) -> bool {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        let pcm = f32_to_pcm16(samples);
        self.shared.samples.lock().extend_from_slice(&pcm);
        true
    }
}
