//! Live screen grabbing through xcap.

use super::{crop_frame, FrameSource, GrabbedPixels};
use crate::error::CaptureError;
use reviewrec_common::{CaptureRegion, PixelLayout};
use tracing::debug;
use xcap::Monitor;

/// Grabs the monitor containing the region's origin and crops to the region.
#[derive(Debug, Default)]
pub struct ScreenSource;

impl ScreenSource {
    pub fn new() -> Self {
        Self
    }
}

/// Monitor bounds as (x, y, width, height).
fn bounds(monitor: &Monitor) -> Result<(i32, i32, u32, u32), CaptureError> {
    let err = |e: xcap::XCapError| CaptureError::FrameCaptureFailure(e.to_string());
    Ok((
        monitor.x().map_err(err)?,
        monitor.y().map_err(err)?,
        monitor.width().map_err(err)?,
        monitor.height().map_err(err)?,
    ))
}

fn find_monitor(region: &CaptureRegion) -> Result<(Monitor, (i32, i32, u32, u32)), CaptureError> {
    let monitors = Monitor::all()
        .map_err(|e| CaptureError::FrameCaptureFailure(format!("Failed to list monitors: {}", e)))?;

    let mut primary = None;
    for monitor in monitors {
        let b = bounds(&monitor)?;
        let (mx, my, mw, mh) = b;
        let inside_x = region.x >= mx && (region.x as i64) < mx as i64 + mw as i64;
        let inside_y = region.y >= my && (region.y as i64) < my as i64 + mh as i64;
        if inside_x && inside_y {
            return Ok((monitor, b));
        }
        if primary.is_none() && monitor.is_primary().unwrap_or(false) {
            primary = Some((monitor, b));
        }
    }

    primary.ok_or_else(|| CaptureError::FrameCaptureFailure("No monitor found".into()))
}

impl FrameSource for ScreenSource {
    fn grab(&mut self, region: &CaptureRegion) -> Result<GrabbedPixels, CaptureError> {
        let (monitor, (mx, my, _, _)) = find_monitor(region)?;
        let image = monitor
            .capture_image()
            .map_err(|e| CaptureError::FrameCaptureFailure(format!("Failed to capture screen: {}", e)))?;

        let (full_width, full_height) = (image.width(), image.height());
        let local_x = (region.x - mx).max(0) as u32;
        let local_y = (region.y - my).max(0) as u32;
        let width = region.width.min(full_width.saturating_sub(local_x));
        let height = region.height.min(full_height.saturating_sub(local_y));
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidRegion(format!(
                "Region lies outside the {}x{} monitor",
                full_width, full_height
            )));
        }

        debug!("Grabbed {}x{} monitor image", full_width, full_height);
        let data = crop_frame(
            image.as_raw(),
            full_width as usize * 4,
            local_x,
            local_y,
            width,
            height,
        );
        Ok((width, height, PixelLayout::Rgba, data))
    }
}
