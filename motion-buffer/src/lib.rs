//! RAW frame buffers and the buffer pool
//!
//! Capture fills buffers taken from a [`BufferPool`]; the streaming pipeline
//! and snapshot readers hand them back when done.
//!
//! - Host and device backing stores behind one [`NativeBuffer`] interface
//! - Per-frame and camera metadata with the container's JSON field names
//! - Unused/Ready buckets with scope guards that never lose a buffer

pub mod buffer;
pub mod metadata;
pub mod native;
pub mod pool;

pub use buffer::*;
pub use metadata::*;
pub use native::*;
pub use pool::*;

pub use motion_codec::{CompressionType, FrameLayout, PixelFormat};
