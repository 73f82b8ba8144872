//! Indexed append-only RAW container
//!
//! A container is a header, one global metadata item, then a (pixel payload,
//! frame metadata) item pair per frame. Committing appends an index of frame
//! offsets. A container whose index never made it to disk can be rescanned
//! with [`ContainerReader::recover`].

pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use error::*;
pub use format::*;
pub use reader::*;
pub use writer::*;

/// Lifecycle of a container handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Accepting frames
    Create,
    /// Index written; no further frames accepted
    Closed,
    /// Opened with a valid index
    Read,
    /// Opened without a usable index; call `recover()`
    Corrupted,
}

/// Name under which a frame is stored and looked up
pub fn frame_name(timestamp: i64) -> String {
    timestamp.to_string()
}
