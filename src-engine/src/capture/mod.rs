//! Screen capture.
//!
//! The capture engine samples a screen region at a target frame rate and
//! persists every frame to the session cache. Grabbing the pixels is behind
//! the [`FrameSource`] trait so the engine does not depend on a particular
//! OS capture API.

pub mod engine;
#[cfg(feature = "screen-capture")]
pub mod screen;
pub mod timer;

pub use engine::{start_capture, CaptureConfig, CaptureEvent, CaptureHandle, StopHandle};
#[cfg(feature = "screen-capture")]
pub use screen::ScreenSource;
pub use timer::{format_elapsed, RecordingTimer, TimerEvent};

use crate::error::CaptureError;
use reviewrec_common::{CaptureRegion, PixelLayout};

/// Raw pixels returned by one grab: width, height, channel order, samples.
pub type GrabbedPixels = (u32, u32, PixelLayout, Vec<u8>);

/// Trait for grabbing one frame of a screen region.
pub trait FrameSource: Send {
    /// Capture the current contents of `region`.
    ///
    /// The returned buffer holds `width * height * 4` bytes without row padding.
    fn grab(&mut self, region: &CaptureRegion) -> Result<GrabbedPixels, CaptureError>;
}

impl<F> FrameSource for F
where
    F: FnMut(&CaptureRegion) -> Result<GrabbedPixels, CaptureError> + Send,
{
    fn grab(&mut self, region: &CaptureRegion) -> Result<GrabbedPixels, CaptureError> {
        self(region)
    }
}

/// Crop a packed 4-byte-per-pixel buffer to a sub-rectangle.
///
/// Rows falling outside the source are filled with zeros.
pub fn crop_frame(
    data: &[u8],
    buffer_stride: usize,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let pixel_stride = 4usize;
    let output_row_bytes = (width as usize) * pixel_stride;
    let mut output = Vec::with_capacity(output_row_bytes * height as usize);

    for row in 0..height {
        let src_start = (y + row) as usize * buffer_stride + (x as usize) * pixel_stride;
        let src_end = src_start + output_row_bytes;

        if src_end <= data.len() {
            output.extend_from_slice(&data[src_start..src_end]);
        } else {
            output.resize(output.len() + output_row_bytes, 0);
        }
    }

    output
}
