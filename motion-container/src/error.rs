//! Container error type

use std::io;

use motion_buffer::BufferError;
use motion_codec::CodecError;
use thiserror::Error;

use crate::ContainerState;

pub type ContainerResult<T> = Result<T, ContainerError>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a container: bad header")]
    InvalidHeader,

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("cannot {operation} in {state:?} state")]
    InvalidState {
        operation: &'static str,
        state: ContainerState,
    },

    #[error("frame {0} not found")]
    FrameNotFound(String),

    #[error("corrupt item at offset {offset}: {reason}")]
    CorruptItem { offset: u64, reason: String },

    #[error("item of {0} bytes exceeds the format limit")]
    ItemTooLarge(usize),

    #[error("container has no backing file")]
    NotBacked,

    #[error("decode failed: {0}")]
    Codec(#[from] CodecError),

    #[error("buffer: {0}")]
    Buffer(#[from] BufferError),
}
