//! Codec error type

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid frame layout: {0}")]
    InvalidLayout(String),

    #[error("buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("unknown compression type {0}")]
    UnknownCompression(u8),

    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("crop of {horizontal}%/{vertical}% leaves no pixels")]
    EmptyCrop { horizontal: u32, vertical: u32 },

    #[error("zstd: {0}")]
    Zstd(#[from] std::io::Error),
}
