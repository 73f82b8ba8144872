//! Multi-threaded RAW streaming to segmented containers
//!
//! Frames flow from capture through three stages joined by channels:
//! process (crop/bin) → compress → IO, with one IO thread per output
//! segment.
//!
//! Key features:
//! - Non-blocking `add()` for the capture thread
//! - Compression kept only when it shrinks the frame
//! - Every buffer goes back to the pool exactly once, also on IO failure

pub mod config;
pub mod error;
pub mod pipeline;
mod priority;
mod stages;

pub use config::*;
pub use error::*;
pub use pipeline::*;

#[cfg(test)]
mod tests {
    use super::*;
    use motion_buffer::BufferPool;
    use std::sync::Arc;

    #[test]
    fn test_pipeline_creation() {
        let pipeline = StreamingPipeline::new(Arc::new(BufferPool::new()), StreamingConfig::default());
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.accepted_frames(), 0);
        assert_eq!(pipeline.estimate_fps(), 0.0);
    }
}
