//! RAW sample codecs
//!
//! Pure, stateless transforms between packed sensor rows and dense samples,
//! plus the compressors the container can tag a frame with.
//!
//! - RAW10/RAW12/RAW16 row packing and unpacking
//! - Crop and 2x2 Bayer binning directly over packed rows
//! - Generic zstd compression over raw bytes
//! - Block bit-packing codecs over unpacked samples

pub mod bitpack;
pub mod compression;
pub mod crop;
pub mod error;
pub mod packing;
pub mod types;

pub use bitpack::*;
pub use compression::*;
pub use crop::*;
pub use error::*;
pub use packing::*;
pub use types::*;
