//! Frame and camera metadata
//!
//! Field names follow the JSON schema of existing capture files, including
//! the historical `sensorArrangment` spelling.

use motion_codec::{CompressionType, FrameLayout, PixelFormat};
use serde::{Deserialize, Serialize};

/// Intended downstream use of a buffered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawType {
    /// Ring-buffered frame for zero-shutter-lag stills
    #[default]
    Zsl,
    /// Member of an HDR bracket
    Hdr,
}

/// Device orientation at capture time
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum ScreenOrientation {
    #[default]
    Portrait = 0,
    ReversePortrait = 1,
    Landscape = 2,
    ReverseLandscape = 3,
}

impl From<ScreenOrientation> for i32 {
    fn from(value: ScreenOrientation) -> Self {
        value as i32
    }
}

impl From<i32> for ScreenOrientation {
    fn from(value: i32) -> Self {
        match value {
            1 => ScreenOrientation::ReversePortrait,
            2 => ScreenOrientation::Landscape,
            3 => ScreenOrientation::ReverseLandscape,
            _ => ScreenOrientation::Portrait,
        }
    }
}

/// Colour filter layout of the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorArrangement {
    #[default]
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

/// Per-frame capture metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    /// Sensor timestamp in nanoseconds
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub row_stride: u32,
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub compression_type: CompressionType,
    #[serde(default)]
    pub is_compressed: bool,
    /// Size of the packed frame before compression. Zero in older files.
    #[serde(default)]
    pub uncompressed_size: u64,
    #[serde(default)]
    pub iso: i32,
    /// Exposure time in nanoseconds
    #[serde(default)]
    pub exposure_time: i64,
    #[serde(default)]
    pub as_shot_neutral: Vec<f32>,
    #[serde(default)]
    pub dynamic_black_level: Vec<f32>,
    #[serde(default)]
    pub dynamic_white_level: f32,
    #[serde(default)]
    pub orientation: ScreenOrientation,
    #[serde(default)]
    pub raw_type: RawType,
    #[serde(default)]
    pub is_binned: bool,
    /// One gain grid per Bayer channel
    #[serde(default)]
    pub lens_shading_map: Vec<Vec<f32>>,
    #[serde(default)]
    pub lens_shading_map_width: u32,
    #[serde(default)]
    pub lens_shading_map_height: u32,
}

impl Default for FrameMetadata {
    fn default() -> Self {
        Self {
            timestamp: 0,
            width: 0,
            height: 0,
            row_stride: 0,
            pixel_format: PixelFormat::Raw10,
            compression_type: CompressionType::Uncompressed,
            is_compressed: false,
            uncompressed_size: 0,
            iso: 0,
            exposure_time: 0,
            as_shot_neutral: Vec::new(),
            dynamic_black_level: Vec::new(),
            dynamic_white_level: 0.0,
            orientation: ScreenOrientation::Portrait,
            raw_type: RawType::Zsl,
            is_binned: false,
            lens_shading_map: Vec::new(),
            lens_shading_map_width: 0,
            lens_shading_map_height: 0,
        }
    }
}

impl FrameMetadata {
    /// Packed geometry described by this metadata.
    ///
    /// A zero row stride (older files) means tightly packed rows.
    pub fn layout(&self) -> FrameLayout {
        let mut layout = FrameLayout::tight(self.pixel_format, self.width, self.height);
        if self.row_stride != 0 {
            layout.row_stride = self.row_stride;
        }
        layout
    }

    /// Adopt a new geometry after crop or bin, rescaling the dynamic levels
    pub fn apply_transform(&mut self, layout: &FrameLayout, level_scale: f32) {
        self.width = layout.width;
        self.height = layout.height;
        self.row_stride = layout.row_stride;
        self.pixel_format = layout.format;
        if level_scale != 1.0 {
            for level in self.dynamic_black_level.iter_mut() {
                *level *= level_scale;
            }
            self.dynamic_white_level *= level_scale;
        }
    }
}

/// Static description of the camera, stored once per container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraDescription {
    #[serde(rename = "sensorArrangment")]
    pub sensor_arrangement: SensorArrangement,
    pub black_level: Vec<f32>,
    pub white_level: f32,
    pub color_illuminant1: String,
    pub color_illuminant2: String,
    pub color_matrix1: Vec<f32>,
    pub color_matrix2: Vec<f32>,
    pub forward_matrix1: Vec<f32>,
    pub forward_matrix2: Vec<f32>,
    pub calibration_matrix1: Vec<f32>,
    pub calibration_matrix2: Vec<f32>,
    pub apertures: Vec<f32>,
    pub focal_lengths: Vec<f32>,
}

impl Default for CameraDescription {
    fn default() -> Self {
        Self {
            sensor_arrangement: SensorArrangement::Rggb,
            black_level: vec![64.0; 4],
            white_level: 1023.0,
            color_illuminant1: "standarda".to_string(),
            color_illuminant2: "d65".to_string(),
            color_matrix1: Vec::new(),
            color_matrix2: Vec::new(),
            forward_matrix1: Vec::new(),
            forward_matrix2: Vec::new(),
            calibration_matrix1: Vec::new(),
            calibration_matrix2: Vec::new(),
            apertures: Vec::new(),
            focal_lengths: Vec::new(),
        }
    }
}
