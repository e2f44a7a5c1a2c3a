//! Shared types for capture and processing sessions.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Screen rectangle sampled by a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    /// Left edge in virtual screen coordinates
    pub x: i32,
    /// Top edge in virtual screen coordinates
    pub y: i32,
    /// Region width in pixels
    pub width: u32,
    /// Region height in pixels
    pub height: u32,
}

impl CaptureRegion {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A region with no area cannot be captured.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Channel order of raw samples as delivered by the grab backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgba,
    Bgra,
}

impl PixelLayout {
    /// Tag byte used in cache entry headers.
    pub fn as_u8(self) -> u8 {
        match self {
            PixelLayout::Rgba => 0,
            PixelLayout::Bgra => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PixelLayout::Rgba),
            1 => Some(PixelLayout::Bgra),
            _ => None,
        }
    }
}

/// Bytes per pixel for every supported layout.
pub const BYTES_PER_PIXEL: usize = 4;

/// A captured frame with its dimensions and pixel data.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Zero-based position in capture order
    pub sequence: u32,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// Packed 4-byte samples, row-major, no padding
    pub data: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

impl CapturedFrame {
    /// Number of bytes `data` must hold for the frame dimensions.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }
}

/// Lifecycle state of the recorder as seen by a front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Paused,
    Processing,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Processing => "processing",
        }
    }
}
