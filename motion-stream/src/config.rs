//! Streaming configuration

use std::time::Duration;

use motion_codec::CompressionType;
use serde::Deserialize;

/// Receive timeout on the stage channels, about two frames at 30 fps
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 67;

/// Worker topology and codec choice for a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub process_threads: usize,
    pub compress_threads: usize,
    pub compression: CompressionType,
    pub queue_timeout_ms: u64,
    /// Nice value requested for IO threads; 0 leaves scheduling alone
    pub io_priority: i32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            process_threads: 2,
            compress_threads: 1,
            compression: CompressionType::Zstd,
            queue_timeout_ms: DEFAULT_QUEUE_TIMEOUT_MS,
            io_priority: -4,
        }
    }
}

impl StreamingConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms.max(1))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
