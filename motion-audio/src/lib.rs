//! Audio capture side channel for RAW streaming
//!
//! Key features:
//! - `AudioSource` contract implemented by the host's recorder
//! - Float to PCM16 conversion with clamping, parallel with rayon
//! - 16-bit PCM WAV output

pub mod clamping;
pub mod source;
pub mod types;
pub mod wav;

pub use clamping::*;
pub use source::*;
pub use types::*;
pub use wav::*;
