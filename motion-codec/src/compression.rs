//! Frame-level compression dispatch
//!
//! `compress` and `decompress` are the only entry points the pipeline and the
//! container use. Byte codecs see the packed frame as-is; sample codecs unpack
//! it first and repack on decode.

use crate::bitpack::codec_for;
use crate::error::CodecError;
use crate::packing::{pack, unpack};
use crate::types::{CompressionType, FrameLayout};

/// zstd level used for frames. Capture throughput matters more than ratio.
pub const ZSTD_LEVEL: i32 = 1;

/// Decoded bytes allowed per payload byte. A zstd block yields at most
/// 128 KiB for a 3-byte header; a bit-packed block yields 64 samples per byte.
pub const MAX_EXPANSION: usize = 1 << 16;

/// Compress the packed bytes of one frame
pub fn compress(
    ty: CompressionType,
    data: &[u8],
    layout: &FrameLayout,
) -> Result<Vec<u8>, CodecError> {
    match ty {
        CompressionType::Uncompressed => Ok(data.to_vec()),
        CompressionType::Zstd => Ok(zstd::bulk::compress(data, ZSTD_LEVEL)?),
        _ => {
            let samples = unpack(layout, data)?;
            let codec = codec_for(ty).ok_or(CodecError::UnknownCompression(ty as u8))?;
            let encoded = codec.encode(&samples, layout.width as usize);
            log::trace!("{:?}: {} -> {} bytes", ty, data.len(), encoded.len());
            Ok(encoded)
        }
    }
}

/// Restore the packed bytes of one frame.
///
/// `expected_len` is the size of the original packed data. Sample codecs
/// produce rows at `layout.row_stride` with zeroed padding, truncated to
/// `expected_len`: pixel samples are lossless but the contents of stride
/// padding are not kept. Byte codecs restore the input exactly.
///
/// Geometry or `expected_len` out of proportion to the payload is rejected
/// as corrupt before any output is allocated.
pub fn decompress(
    ty: CompressionType,
    payload: &[u8],
    layout: &FrameLayout,
    expected_len: usize,
) -> Result<Vec<u8>, CodecError> {
    let limit = payload.len().saturating_mul(MAX_EXPANSION);
    if ty != CompressionType::Uncompressed && expected_len > limit {
        return Err(CodecError::CorruptPayload(format!(
            "{ty:?} payload of {} bytes cannot hold {expected_len} bytes",
            payload.len()
        )));
    }

    let data = match ty {
        CompressionType::Uncompressed => payload.to_vec(),
        CompressionType::Zstd => zstd::bulk::decompress(payload, expected_len)?,
        _ => {
            match layout.checked_min_len() {
                Some(len) if len <= limit => {}
                _ => {
                    return Err(CodecError::CorruptPayload(format!(
                        "{}x{} frame does not fit a {} byte payload",
                        layout.width,
                        layout.height,
                        payload.len()
                    )))
                }
            }
            let codec = codec_for(ty).ok_or(CodecError::UnknownCompression(ty as u8))?;
            let samples = codec.decode(payload, layout.pixel_count(), layout.width as usize)?;
            let mut data = pack(layout, &samples)?;
            data.truncate(expected_len);
            data
        }
    };

    if data.len() != expected_len {
        return Err(CodecError::CorruptPayload(format!(
            "{ty:?} payload decoded to {} bytes, expected {expected_len}",
            data.len()
        )));
    }
    Ok(data)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::types::PixelFormat;
    use proptest::prelude::*;

    fn format_strategy() -> impl Strategy<Value = PixelFormat> {
        prop_oneof![
            Just(PixelFormat::Raw10),
            Just(PixelFormat::Raw12),
            Just(PixelFormat::Raw16),
        ]
    }

    fn codec_strategy() -> impl Strategy<Value = CompressionType> {
        prop_oneof![
            Just(CompressionType::Zstd),
            Just(CompressionType::BitPack),
            Just(CompressionType::DeltaBitPack),
            Just(CompressionType::BitPlane),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            format in format_strategy(),
            ty in codec_strategy(),
            groups in 1u32..8,
            height in 1u32..6,
            seed in any::<u64>(),
        ) {
            let width = groups * 4;
            let layout = FrameLayout::tight(format, width, height);
            let samples: Vec<u16> = (0..layout.pixel_count() as u64)
                .map(|i| (i.wrapping_mul(seed | 1).rotate_left(17) as u16) & format.max_value())
                .collect();
            let data = pack(&layout, &samples).unwrap();

            let payload = compress(ty, &data, &layout).unwrap();
            let restored = decompress(ty, &payload, &layout, data.len()).unwrap();
            prop_assert_eq!(restored, data);
        }
    }
}
