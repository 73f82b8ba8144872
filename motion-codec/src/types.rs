//! Pixel format and compression type enumerations

use serde::{Deserialize, Serialize};

use crate::CodecError;

/// RAW pixel format as delivered by the sensor
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Raw10 = 0, // 4 pixels in 5 bytes
    Raw12 = 1, // 2 pixels in 3 bytes
    Raw16 = 2, // Little-endian u16 per pixel
}

impl PixelFormat {
    /// Pixels per packed group
    pub fn group_pixels(self) -> usize {
        match self {
            PixelFormat::Raw10 => 4,
            PixelFormat::Raw12 => 2,
            PixelFormat::Raw16 => 1,
        }
    }

    /// Bytes per packed group
    pub fn group_bytes(self) -> usize {
        match self {
            PixelFormat::Raw10 => 5,
            PixelFormat::Raw12 => 3,
            PixelFormat::Raw16 => 2,
        }
    }

    /// Largest sample value representable by this format
    pub fn max_value(self) -> u16 {
        match self {
            PixelFormat::Raw10 => 0x03FF,
            PixelFormat::Raw12 => 0x0FFF,
            PixelFormat::Raw16 => 0xFFFF,
        }
    }

    /// Packed bytes occupied by one row of `width` pixels
    pub fn row_bytes(self, width: u32) -> usize {
        width as usize / self.group_pixels() * self.group_bytes()
    }
}

/// Compression applied to a frame payload.
///
/// The discriminant is what the container stores in `compressionType`, so the
/// values must never be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CompressionType {
    #[default]
    Uncompressed = 0,
    Zstd = 1,
    BitPack = 2,      // Per-block bit width, raw samples
    DeltaBitPack = 3, // Per-block bit width, same-colour horizontal deltas
    BitPlane = 4,     // Same deltas, transposed into bit planes
}

impl CompressionType {
    /// Whether this codec works on unpacked samples rather than raw bytes
    pub fn is_sample_codec(self) -> bool {
        matches!(
            self,
            CompressionType::BitPack | CompressionType::DeltaBitPack | CompressionType::BitPlane
        )
    }
}

impl From<CompressionType> for u8 {
    fn from(value: CompressionType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionType::Uncompressed),
            1 => Ok(CompressionType::Zstd),
            2 => Ok(CompressionType::BitPack),
            3 => Ok(CompressionType::DeltaBitPack),
            4 => Ok(CompressionType::BitPlane),
            other => Err(CodecError::UnknownCompression(other)),
        }
    }
}

/// Geometry of a packed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows
    pub row_stride: u32,
}

impl FrameLayout {
    /// Layout with rows packed back to back
    pub fn tight(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            row_stride: format.row_bytes(width) as u32,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.checked_pixel_count().unwrap_or(usize::MAX)
    }

    pub fn checked_pixel_count(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }

    /// Minimum number of bytes a buffer must hold for this layout.
    ///
    /// The last row does not need its stride padding. Saturates for
    /// geometries that do not fit in memory.
    pub fn min_len(&self) -> usize {
        self.checked_min_len().unwrap_or(usize::MAX)
    }

    pub fn checked_min_len(&self) -> Option<usize> {
        if self.height == 0 {
            return Some(0);
        }
        (self.height as usize - 1)
            .checked_mul(self.row_stride as usize)?
            .checked_add(self.format.row_bytes(self.width))
    }

    /// Number of bytes covered by all rows including padding
    pub fn stride_len(&self) -> usize {
        (self.height as usize).saturating_mul(self.row_stride as usize)
    }

    /// Check that width and stride are consistent with the pixel format
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width as usize % self.format.group_pixels() != 0 {
            return Err(CodecError::InvalidLayout(format!(
                "width {} is not a multiple of {} for {:?}",
                self.width,
                self.format.group_pixels(),
                self.format
            )));
        }
        if (self.row_stride as usize) < self.format.row_bytes(self.width) {
            return Err(CodecError::InvalidLayout(format!(
                "row stride {} shorter than packed row of {} bytes",
                self.row_stride,
                self.format.row_bytes(self.width)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_bytes() {
        assert_eq!(PixelFormat::Raw10.row_bytes(4000), 5000);
        assert_eq!(PixelFormat::Raw12.row_bytes(4000), 6000);
        assert_eq!(PixelFormat::Raw16.row_bytes(4000), 8000);
    }

    #[test]
    fn test_compression_type_discriminants() {
        for value in 0u8..5 {
            let ty = CompressionType::try_from(value).unwrap();
            assert_eq!(u8::from(ty), value);
        }
        assert!(CompressionType::try_from(9).is_err());
    }

    #[test]
    fn test_layout_validation() {
        assert!(FrameLayout::tight(PixelFormat::Raw10, 16, 4).validate().is_ok());
        assert!(FrameLayout::tight(PixelFormat::Raw10, 18, 4).validate().is_err());

        let mut layout = FrameLayout::tight(PixelFormat::Raw12, 16, 4);
        layout.row_stride = 10;
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_min_len_excludes_last_row_padding() {
        let layout = FrameLayout {
            format: PixelFormat::Raw16,
            width: 8,
            height: 3,
            row_stride: 32,
        };
        assert_eq!(layout.min_len(), 2 * 32 + 16);
        assert_eq!(layout.stride_len(), 96);
    }

    #[test]
    fn test_huge_layout_saturates() {
        let layout = FrameLayout {
            format: PixelFormat::Raw16,
            width: u32::MAX - 3,
            height: u32::MAX,
            row_stride: u32::MAX,
        };
        let expected = (u32::MAX as u128 - 1) * u32::MAX as u128 + 2 * (u32::MAX as u128 - 3);
        match layout.checked_min_len() {
            Some(len) => assert_eq!(len as u128, expected),
            None => assert!(expected > usize::MAX as u128),
        }
        assert!(layout.stride_len() as u128 <= u32::MAX as u128 * u32::MAX as u128);
    }
}
