//! Bit-packed RAW row conversion
//!
//! Sensor rows arrive sub-byte packed. These routines convert between the
//! packed wire layout and a dense `u16` per pixel.
//!
//! RAW10: `P0[9:2] P1[9:2] P2[9:2] P3[9:2] (P3[1:0] P2[1:0] P1[1:0] P0[1:0])`
//! RAW12: `P0[11:4] P1[11:4] (P1[3:0] P0[3:0])`
//! RAW16: little-endian `u16`

use rayon::prelude::*;

use crate::error::CodecError;
use crate::types::{FrameLayout, PixelFormat};

/// Unpack one packed row into `dst`, one sample per pixel.
///
/// `dst.len()` is the row width and must be a multiple of the format's group size.
pub fn unpack_row(format: PixelFormat, src: &[u8], dst: &mut [u16]) {
    match format {
        PixelFormat::Raw10 => {
            for (group, out) in src.chunks_exact(5).zip(dst.chunks_exact_mut(4)) {
                let low = group[4] as u16;
                out[0] = (group[0] as u16) << 2 | (low & 0x3);
                out[1] = (group[1] as u16) << 2 | ((low >> 2) & 0x3);
                out[2] = (group[2] as u16) << 2 | ((low >> 4) & 0x3);
                out[3] = (group[3] as u16) << 2 | ((low >> 6) & 0x3);
            }
        }
        PixelFormat::Raw12 => {
            for (group, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(2)) {
                let low = group[2] as u16;
                out[0] = (group[0] as u16) << 4 | (low & 0xF);
                out[1] = (group[1] as u16) << 4 | (low >> 4);
            }
        }
        PixelFormat::Raw16 => {
            for (bytes, out) in src.chunks_exact(2).zip(dst.iter_mut()) {
                *out = u16::from_le_bytes([bytes[0], bytes[1]]);
            }
        }
    }
}

/// Pack one row of samples into `dst`.
///
/// Samples wider than the format are masked to its bit depth.
pub fn pack_row(format: PixelFormat, src: &[u16], dst: &mut [u8]) {
    match format {
        PixelFormat::Raw10 => {
            for (pixels, group) in src.chunks_exact(4).zip(dst.chunks_exact_mut(5)) {
                let p = [
                    pixels[0] & 0x3FF,
                    pixels[1] & 0x3FF,
                    pixels[2] & 0x3FF,
                    pixels[3] & 0x3FF,
                ];
                group[0] = (p[0] >> 2) as u8;
                group[1] = (p[1] >> 2) as u8;
                group[2] = (p[2] >> 2) as u8;
                group[3] = (p[3] >> 2) as u8;
                group[4] = ((p[0] & 0x3) | (p[1] & 0x3) << 2 | (p[2] & 0x3) << 4 | (p[3] & 0x3) << 6) as u8;
            }
        }
        PixelFormat::Raw12 => {
            for (pixels, group) in src.chunks_exact(2).zip(dst.chunks_exact_mut(3)) {
                let p0 = pixels[0] & 0xFFF;
                let p1 = pixels[1] & 0xFFF;
                group[0] = (p0 >> 4) as u8;
                group[1] = (p1 >> 4) as u8;
                group[2] = ((p0 & 0xF) | (p1 & 0xF) << 4) as u8;
            }
        }
        PixelFormat::Raw16 => {
            for (pixel, bytes) in src.iter().zip(dst.chunks_exact_mut(2)) {
                bytes.copy_from_slice(&pixel.to_le_bytes());
            }
        }
    }
}

fn check_len(layout: &FrameLayout, actual: usize) -> Result<(), CodecError> {
    layout.validate()?;
    let needed = layout.min_len();
    if actual < needed {
        return Err(CodecError::BufferTooSmall { needed, actual });
    }
    Ok(())
}

/// Unpack a whole frame into a dense `width * height` sample array
pub fn unpack(layout: &FrameLayout, data: &[u8]) -> Result<Vec<u16>, CodecError> {
    check_len(layout, data.len())?;

    let width = layout.width as usize;
    let stride = layout.row_stride as usize;
    let row_bytes = layout.format.row_bytes(layout.width);
    let mut samples = vec![0u16; layout.pixel_count()];

    if width == 0 {
        return Ok(samples);
    }

    samples
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let offset = y * stride;
            unpack_row(layout.format, &data[offset..offset + row_bytes], row);
        });

    Ok(samples)
}

/// Pack dense samples into a frame laid out with `layout.row_stride`.
///
/// Stride padding is zero-filled. The returned buffer covers every row
/// including the padding of the last one.
pub fn pack(layout: &FrameLayout, samples: &[u16]) -> Result<Vec<u8>, CodecError> {
    layout.validate()?;
    if samples.len() < layout.pixel_count() {
        return Err(CodecError::BufferTooSmall {
            needed: layout.pixel_count(),
            actual: samples.len(),
        });
    }

    let width = layout.width as usize;
    let stride = layout.row_stride as usize;
    let row_bytes = layout.format.row_bytes(layout.width);
    let mut data = vec![0u8; layout.stride_len()];

    if width == 0 || stride == 0 {
        return Ok(data);
    }

    data.par_chunks_mut(stride)
        .zip(samples.par_chunks(width))
        .for_each(|(out, row)| {
            pack_row(layout.format, row, &mut out[..row_bytes]);
        });

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_samples(format: PixelFormat, count: usize) -> Vec<u16> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| rng.gen_range(0..=format.max_value()))
            .collect()
    }

    #[test]
    fn test_raw10_known_bytes() {
        let samples = [0x3FF, 0x000, 0x155, 0x2AA];
        let mut packed = [0u8; 5];
        pack_row(PixelFormat::Raw10, &samples, &mut packed);

        assert_eq!(packed[0], 0xFF);
        assert_eq!(packed[1], 0x00);
        assert_eq!(packed[2], 0x55);
        assert_eq!(packed[3], 0xAA);
        // Low bits: P0=11, P1=00, P2=01, P3=10
        assert_eq!(packed[4], 0b10_01_00_11);

        let mut unpacked = [0u16; 4];
        unpack_row(PixelFormat::Raw10, &packed, &mut unpacked);
        assert_eq!(unpacked, samples);
    }

    #[test]
    fn test_raw12_known_bytes() {
        let samples = [0xABC, 0x123];
        let mut packed = [0u8; 3];
        pack_row(PixelFormat::Raw12, &samples, &mut packed);
        assert_eq!(packed, [0xAB, 0x12, 0x3C]);
    }

    #[test]
    fn test_frame_round_trip_all_formats() {
        for format in [PixelFormat::Raw10, PixelFormat::Raw12, PixelFormat::Raw16] {
            let layout = FrameLayout::tight(format, 32, 6);
            let samples = random_samples(format, layout.pixel_count());
            let packed = pack(&layout, &samples).unwrap();
            assert_eq!(packed.len(), layout.min_len());
            assert_eq!(unpack(&layout, &packed).unwrap(), samples, "{format:?}");
        }
    }

    #[test]
    fn test_boundary_patterns() {
        for format in [PixelFormat::Raw10, PixelFormat::Raw12, PixelFormat::Raw16] {
            let layout = FrameLayout::tight(format, 8, 2);
            for pattern in [0u16, format.max_value()] {
                let samples = vec![pattern; layout.pixel_count()];
                let packed = pack(&layout, &samples).unwrap();
                assert_eq!(unpack(&layout, &packed).unwrap(), samples);
            }
        }
    }

    #[test]
    fn test_strided_rows() {
        let layout = FrameLayout {
            format: PixelFormat::Raw12,
            width: 8,
            height: 3,
            row_stride: 16,
        };
        let samples = random_samples(PixelFormat::Raw12, layout.pixel_count());
        let packed = pack(&layout, &samples).unwrap();

        assert_eq!(packed.len(), 48);
        assert!(packed[12..16].iter().all(|&b| b == 0), "padding not zeroed");
        assert_eq!(unpack(&layout, &packed).unwrap(), samples);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let layout = FrameLayout::tight(PixelFormat::Raw16, 8, 4);
        let result = unpack(&layout, &[0u8; 10]);
        assert!(matches!(result, Err(CodecError::BufferTooSmall { .. })));
    }
}
