//! Crop and 2x2 Bayer binning over packed rows
//!
//! Both transforms run in place: output rows are never longer than the
//! source rows they are built from, so writing row `r` of the output can only
//! touch bytes that have already been read.

use crate::error::CodecError;
use crate::packing::{pack_row, unpack_row};
use crate::types::{FrameLayout, PixelFormat};

/// Upper bound on the crop amount per axis, in percent
pub const MAX_CROP_PERCENT: u32 = 90;

/// Pixel rectangle kept by a crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Outcome of a crop or bin pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformResult {
    /// Tightly packed layout of the transformed frame
    pub layout: FrameLayout,
    /// Factor to apply to black and white levels
    pub level_scale: f32,
}

impl TransformResult {
    /// Bytes occupied by the transformed frame
    pub fn len(&self) -> usize {
        self.layout.min_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Centered crop region removing `horizontal`% of the width and `vertical`%
/// of the height.
///
/// The origin stays on a 4-pixel column and even row so the Bayer phase and
/// RAW10 group alignment are preserved. Width and height are multiples of 4
/// so the result can always be binned.
pub fn crop_region(
    width: u32,
    height: u32,
    horizontal: u32,
    vertical: u32,
) -> Result<CropRegion, CodecError> {
    let h = horizontal.min(MAX_CROP_PERCENT) as u64;
    let v = vertical.min(MAX_CROP_PERCENT) as u64;

    let x = ((width as u64 * h / 100 / 2) as u32) & !3;
    let y = ((height as u64 * v / 100 / 2) as u32) & !1;
    let crop_width = width.saturating_sub(2 * x) & !3;
    let crop_height = height.saturating_sub(2 * y) & !3;

    if crop_width == 0 || crop_height == 0 {
        return Err(CodecError::EmptyCrop {
            horizontal,
            vertical,
        });
    }

    Ok(CropRegion {
        x,
        y,
        width: crop_width,
        height: crop_height,
    })
}

/// Right shift that brings a RAW16 white level into 12 bits.
///
/// A non-positive white level is treated as full 16-bit range.
pub fn shift_to_12bit(white_level: f32) -> u32 {
    let white = if white_level > 0.0 {
        white_level as u32
    } else {
        u16::MAX as u32
    };
    let mut shift = 0;
    while (white >> shift) > PixelFormat::Raw12.max_value() as u32 {
        shift += 1;
    }
    shift
}

fn check_source(layout: &FrameLayout, data: &[u8]) -> Result<(), CodecError> {
    layout.validate()?;
    let needed = layout.min_len();
    if data.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Crop `data` in place to `region`.
///
/// The pixel format is preserved except RAW16, which is repacked to RAW12
/// after shifting by [`shift_to_12bit`] of `white_level`.
pub fn crop_in_place(
    data: &mut [u8],
    layout: &FrameLayout,
    region: &CropRegion,
    white_level: f32,
) -> Result<TransformResult, CodecError> {
    check_source(layout, data)?;

    if region.x + region.width > layout.width || region.y + region.height > layout.height {
        return Err(CodecError::InvalidLayout(format!(
            "crop {region:?} outside {}x{} frame",
            layout.width, layout.height
        )));
    }
    if region.x as usize % layout.format.group_pixels() != 0
        || region.width as usize % layout.format.group_pixels() != 0
    {
        return Err(CodecError::InvalidLayout(format!(
            "crop {region:?} not aligned to {:?} groups",
            layout.format
        )));
    }

    let (output, shift) = match layout.format {
        PixelFormat::Raw16 => (PixelFormat::Raw12, shift_to_12bit(white_level)),
        other => (other, 0),
    };
    let out_layout = FrameLayout::tight(output, region.width, region.height);
    let out_row_bytes = out_layout.row_stride as usize;
    let in_stride = layout.row_stride as usize;
    let x_bytes = layout.format.row_bytes(region.x);
    let in_row_bytes = layout.format.row_bytes(region.width);
    let max_value = output.max_value();

    let mut row = vec![0u16; region.width as usize];

    for r in 0..region.height as usize {
        let src = (r + region.y as usize) * in_stride + x_bytes;
        unpack_row(layout.format, &data[src..src + in_row_bytes], &mut row);

        if shift > 0 {
            for sample in row.iter_mut() {
                *sample = (*sample >> shift).min(max_value);
            }
        }

        let dst = r * out_row_bytes;
        pack_row(output, &row, &mut data[dst..dst + out_row_bytes]);
    }

    Ok(TransformResult {
        layout: out_layout,
        level_scale: 1.0 / (1u32 << shift) as f32,
    })
}

/// Bin a Bayer mosaic 2x2 in place, producing RAW12 at half resolution.
///
/// Each output sample combines the four same-colour samples of a 4x4 input
/// block. RAW10 input is summed (exactly 12 bits), RAW12 is averaged and
/// RAW16 is averaged then shifted into 12 bits.
pub fn bin_in_place(
    data: &mut [u8],
    layout: &FrameLayout,
    white_level: f32,
) -> Result<TransformResult, CodecError> {
    check_source(layout, data)?;

    if layout.width % 4 != 0 || layout.height % 4 != 0 {
        return Err(CodecError::InvalidLayout(format!(
            "binning needs dimensions divisible by 4, got {}x{}",
            layout.width, layout.height
        )));
    }

    let width = layout.width as usize;
    let in_stride = layout.row_stride as usize;
    let in_row_bytes = layout.format.row_bytes(layout.width);
    let out_layout = FrameLayout::tight(PixelFormat::Raw12, layout.width / 2, layout.height / 2);
    let out_width = out_layout.width as usize;
    let out_row_bytes = out_layout.row_stride as usize;

    let (shift, level_scale) = match layout.format {
        PixelFormat::Raw10 => (0, 4.0),
        PixelFormat::Raw12 => (2, 1.0),
        PixelFormat::Raw16 => {
            let extra = shift_to_12bit(white_level);
            (2 + extra, 1.0 / (1u32 << extra) as f32)
        }
    };
    let max_value = PixelFormat::Raw12.max_value() as u32;

    let mut rows = vec![vec![0u16; width]; 4];
    let mut out_row = vec![0u16; out_width];

    for block_y in 0..layout.height as usize / 4 {
        for (j, row) in rows.iter_mut().enumerate() {
            let src = (block_y * 4 + j) * in_stride;
            unpack_row(layout.format, &data[src..src + in_row_bytes], row);
        }

        for py in 0..2 {
            for (ox, out) in out_row.iter_mut().enumerate() {
                let x = (ox / 2) * 4 + (ox & 1);
                let sum = rows[py][x] as u32
                    + rows[py][x + 2] as u32
                    + rows[py + 2][x] as u32
                    + rows[py + 2][x + 2] as u32;
                *out = (sum >> shift).min(max_value) as u16;
            }

            let dst = (block_y * 2 + py) * out_row_bytes;
            pack_row(PixelFormat::Raw12, &out_row, &mut data[dst..dst + out_row_bytes]);
        }
    }

    Ok(TransformResult {
        layout: out_layout,
        level_scale,
    })
}
