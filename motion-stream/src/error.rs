//! Streaming error type

use std::io;

use motion_audio::AudioError;
use motion_buffer::BufferError;
use motion_codec::CodecError;
use motion_container::ContainerError;
use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("streaming session already started")]
    AlreadyStarted,

    #[error("streaming session already stopped")]
    AlreadyStopped,

    #[error("failed to spawn {name}: {source}")]
    Spawn { name: String, source: io::Error },

    #[error("container: {0}")]
    Container(#[from] ContainerError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("buffer: {0}")]
    Buffer(#[from] BufferError),

    #[error("audio: {0}")]
    Audio(#[from] AudioError),
}
