//! Block bit-packing codecs for narrow-range Bayer samples
//!
//! Samples are coded in independent blocks of [`BLOCK_SIZE`]. Every block
//! starts with one byte holding its bit width `w`, followed by `w * 8` bytes
//! of payload. A partial final block is zero-padded; the decoder truncates to
//! the sample count it was asked for.

use rayon::prelude::*;

use crate::error::CodecError;
use crate::types::CompressionType;

/// Samples per coded block
pub const BLOCK_SIZE: usize = 64;

/// Widest residual a block may declare (zigzagged 16-bit deltas need 17 bits)
const MAX_BITS: u32 = 17;

/// Blocks handed to one rayon task while encoding
const BLOCKS_PER_TASK: usize = 512;

/// Sample codec selected by a [`CompressionType`]
pub trait RawCodec: Send + Sync {
    /// Compression type stored in the container for this codec
    fn id(&self) -> CompressionType;

    /// Human-readable codec name for logs
    fn name(&self) -> &'static str;

    /// Encode a `width`-wide mosaic of samples
    fn encode(&self, samples: &[u16], width: usize) -> Vec<u8>;

    /// Decode exactly `count` samples of a `width`-wide mosaic
    fn decode(&self, payload: &[u8], count: usize, width: usize) -> Result<Vec<u16>, CodecError>;
}

/// Look up the sample codec for `ty`, if it is one
pub fn codec_for(ty: CompressionType) -> Option<&'static dyn RawCodec> {
    match ty {
        CompressionType::BitPack => Some(&BitPackCodec),
        CompressionType::DeltaBitPack => Some(&DeltaBitPackCodec),
        CompressionType::BitPlane => Some(&BitPlaneCodec),
        CompressionType::Uncompressed | CompressionType::Zstd => None,
    }
}

/// Raw samples at their per-block bit width
pub struct BitPackCodec;

/// Zigzagged same-colour horizontal deltas at their per-block bit width
pub struct DeltaBitPackCodec;

/// Same residuals as [`DeltaBitPackCodec`], stored as one 64-bit plane per bit
pub struct BitPlaneCodec;

impl RawCodec for BitPackCodec {
    fn id(&self) -> CompressionType {
        CompressionType::BitPack
    }

    fn name(&self) -> &'static str {
        "bitpack"
    }

    fn encode(&self, samples: &[u16], _width: usize) -> Vec<u8> {
        let values: Vec<u32> = samples.iter().map(|&s| s as u32).collect();
        encode_blocks(&values, write_packed)
    }

    fn decode(&self, payload: &[u8], count: usize, _width: usize) -> Result<Vec<u16>, CodecError> {
        let values = decode_blocks(payload, count, read_packed)?;
        values
            .into_iter()
            .map(|v| {
                u16::try_from(v).map_err(|_| CodecError::CorruptPayload(format!("sample {v} exceeds 16 bits")))
            })
            .collect()
    }
}

impl RawCodec for DeltaBitPackCodec {
    fn id(&self) -> CompressionType {
        CompressionType::DeltaBitPack
    }

    fn name(&self) -> &'static str {
        "delta-bitpack"
    }

    fn encode(&self, samples: &[u16], width: usize) -> Vec<u8> {
        encode_blocks(&residuals(samples, width), write_packed)
    }

    fn decode(&self, payload: &[u8], count: usize, width: usize) -> Result<Vec<u16>, CodecError> {
        let values = decode_blocks(payload, count, read_packed)?;
        reconstruct(&values, width)
    }
}

impl RawCodec for BitPlaneCodec {
    fn id(&self) -> CompressionType {
        CompressionType::BitPlane
    }

    fn name(&self) -> &'static str {
        "bitplane"
    }

    fn encode(&self, samples: &[u16], width: usize) -> Vec<u8> {
        encode_blocks(&residuals(samples, width), write_planes)
    }

    fn decode(&self, payload: &[u8], count: usize, width: usize) -> Result<Vec<u16>, CodecError> {
        let values = decode_blocks(payload, count, read_planes)?;
        reconstruct(&values, width)
    }
}

#[inline]
fn zigzag(delta: i32) -> u32 {
    ((delta << 1) ^ (delta >> 31)) as u32
}

#[inline]
fn unzigzag(value: u32) -> i32 {
    (value >> 1) as i32 ^ -((value & 1) as i32)
}

/// Zigzagged difference to the same-colour neighbour two columns left.
///
/// The first two columns of each row are predicted from zero.
fn residuals(samples: &[u16], width: usize) -> Vec<u32> {
    let mut out = vec![0u32; samples.len()];
    if width == 0 {
        return out;
    }

    out.par_chunks_mut(width)
        .zip(samples.par_chunks(width))
        .for_each(|(res, row)| {
            for x in 0..row.len() {
                let prediction = if x >= 2 { row[x - 2] as i32 } else { 0 };
                res[x] = zigzag(row[x] as i32 - prediction);
            }
        });

    out
}

fn reconstruct(residuals: &[u32], width: usize) -> Result<Vec<u16>, CodecError> {
    let mut out = vec![0u16; residuals.len()];
    if width == 0 {
        return Ok(out);
    }

    for (row, res) in out.chunks_mut(width).zip(residuals.chunks(width)) {
        for x in 0..row.len() {
            let prediction = if x >= 2 { row[x - 2] as i32 } else { 0 };
            let value = prediction + unzigzag(res[x]);
            row[x] = u16::try_from(value)
                .map_err(|_| CodecError::CorruptPayload(format!("residual decodes to {value}")))?;
        }
    }

    Ok(out)
}

fn block_bits(block: &[u32]) -> u32 {
    let max = block.iter().copied().max().unwrap_or(0);
    32 - max.leading_zeros()
}

fn encode_blocks(values: &[u32], write: fn(&[u32; BLOCK_SIZE], u32, &mut Vec<u8>)) -> Vec<u8> {
    let chunks: Vec<Vec<u8>> = values
        .par_chunks(BLOCK_SIZE * BLOCKS_PER_TASK)
        .map(|chunk| {
            let mut out = Vec::with_capacity(chunk.len() * 2);
            let mut block = [0u32; BLOCK_SIZE];
            for values in chunk.chunks(BLOCK_SIZE) {
                block.fill(0);
                block[..values.len()].copy_from_slice(values);
                let bits = block_bits(&block);
                out.push(bits as u8);
                write(&block, bits, &mut out);
            }
            out
        })
        .collect();

    chunks.concat()
}

fn decode_blocks(
    payload: &[u8],
    count: usize,
    read: fn(&[u8], u32, &mut [u32; BLOCK_SIZE]),
) -> Result<Vec<u32>, CodecError> {
    // Every block costs at least its width byte
    if count > payload.len().saturating_mul(BLOCK_SIZE) {
        return Err(CodecError::CorruptPayload(format!(
            "{count} samples cannot fit in {} bytes",
            payload.len()
        )));
    }

    let mut out = Vec::with_capacity(count + BLOCK_SIZE);
    let mut block = [0u32; BLOCK_SIZE];
    let mut pos = 0;

    while out.len() < count {
        let bits = *payload
            .get(pos)
            .ok_or_else(|| CodecError::CorruptPayload(format!("payload ends after {} samples", out.len())))?
            as u32;
        if bits > MAX_BITS {
            return Err(CodecError::CorruptPayload(format!("block declares {bits} bits")));
        }
        pos += 1;

        let len = bits as usize * BLOCK_SIZE / 8;
        let body = payload
            .get(pos..pos + len)
            .ok_or_else(|| CodecError::CorruptPayload("truncated block".to_string()))?;
        read(body, bits, &mut block);
        out.extend_from_slice(&block);
        pos += len;
    }

    out.truncate(count);
    Ok(out)
}

/// Values back to back, least significant bit first
fn write_packed(block: &[u32; BLOCK_SIZE], bits: u32, out: &mut Vec<u8>) {
    let mut acc: u64 = 0;
    let mut filled = 0;

    for &value in block {
        acc |= (value as u64) << filled;
        filled += bits;
        while filled >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            filled -= 8;
        }
    }
}

fn read_packed(body: &[u8], bits: u32, block: &mut [u32; BLOCK_SIZE]) {
    let mask = (1u64 << bits) - 1;
    let mut acc: u64 = 0;
    let mut filled = 0;
    let mut bytes = body.iter();

    for value in block.iter_mut() {
        while filled < bits {
            acc |= (*bytes.next().unwrap_or(&0) as u64) << filled;
            filled += 8;
        }
        *value = (acc & mask) as u32;
        acc >>= bits;
        filled -= bits;
    }
}

/// Plane `b` holds bit `b` of every value; bit `i` of a plane is value `i`
fn write_planes(block: &[u32; BLOCK_SIZE], bits: u32, out: &mut Vec<u8>) {
    for b in 0..bits {
        let mut plane = 0u64;
        for (i, &value) in block.iter().enumerate() {
            plane |= (((value >> b) & 1) as u64) << i;
        }
        out.extend_from_slice(&plane.to_le_bytes());
    }
}

fn read_planes(body: &[u8], bits: u32, block: &mut [u32; BLOCK_SIZE]) {
    block.fill(0);
    for (b, plane) in body.chunks_exact(8).take(bits as usize).enumerate() {
        let plane = u64::from_le_bytes([
            plane[0], plane[1], plane[2], plane[3], plane[4], plane[5], plane[6], plane[7],
        ]);
        for (i, value) in block.iter_mut().enumerate() {
            *value |= (((plane >> i) & 1) as u32) << b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const CODECS: [CompressionType; 3] = [
        CompressionType::BitPack,
        CompressionType::DeltaBitPack,
        CompressionType::BitPlane,
    ];

    #[test]
    fn test_zigzag() {
        for delta in [-65535, -1, 0, 1, 4095, 65535] {
            assert_eq!(unzigzag(zigzag(delta)), delta);
        }
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
    }

    #[test]
    fn test_codec_lookup() {
        for ty in CODECS {
            assert_eq!(codec_for(ty).unwrap().id(), ty);
        }
        assert!(codec_for(CompressionType::Zstd).is_none());
    }

    #[test]
    fn test_round_trip_random_partial_block() {
        let mut rng = rand::thread_rng();
        let width = 20;
        let samples: Vec<u16> = (0..width * 7).map(|_| rng.gen()).collect();

        for ty in CODECS {
            let codec = codec_for(ty).unwrap();
            let encoded = codec.encode(&samples, width);
            let decoded = codec.decode(&encoded, samples.len(), width).unwrap();
            assert_eq!(decoded, samples, "{}", codec.name());
        }
    }

    #[test]
    fn test_all_zero_block_is_one_byte() {
        let samples = vec![0u16; BLOCK_SIZE];
        for ty in CODECS {
            let encoded = codec_for(ty).unwrap().encode(&samples, 16);
            assert_eq!(encoded, vec![0u8]);
        }
    }

    #[test]
    fn test_smooth_mosaic_beats_raw_width() {
        // Slowly varying 10-bit ramp: deltas stay within a few bits
        let width = 256;
        let samples: Vec<u16> = (0..width * 16)
            .map(|i| 64 + ((i % width) / 8) as u16 + (i % 2) as u16 * 3)
            .collect();

        let packed = BitPackCodec.encode(&samples, width);
        let delta = DeltaBitPackCodec.encode(&samples, width);
        assert!(delta.len() < packed.len());
        assert!(packed.len() < samples.len() * 2);
    }

    #[test]
    fn test_truncated_payload_fails() {
        let samples: Vec<u16> = (0..256).map(|i| i as u16 * 100).collect();
        for ty in CODECS {
            let codec = codec_for(ty).unwrap();
            let encoded = codec.encode(&samples, 16);
            let result = codec.decode(&encoded[..encoded.len() / 2], samples.len(), 16);
            assert!(matches!(result, Err(CodecError::CorruptPayload(_))), "{}", codec.name());
        }
    }

    #[test]
    fn test_sample_count_beyond_payload_rejected() {
        let payload = [0u8; 16];
        for ty in CODECS {
            let result = codec_for(ty).unwrap().decode(&payload, 16 * BLOCK_SIZE + 1, 64);
            assert!(matches!(result, Err(CodecError::CorruptPayload(_))), "{ty:?}");
        }
        assert_eq!(BitPackCodec.decode(&payload, 16 * BLOCK_SIZE, 64).unwrap(), vec![0; 16 * BLOCK_SIZE]);
    }

    #[test]
    fn test_bad_bit_width_rejected() {
        let payload = [40u8; 16];
        assert!(BitPackCodec.decode(&payload, 64, 8).is_err());
    }
}
