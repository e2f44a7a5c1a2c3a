//! Frame conversion: cached raw frame to a conformed, tagged PNG.
//!
//! Steps per frame:
//! 1. Reorder channels to RGB and drop alpha.
//! 2. Downscale with Lanczos3 if the frame exceeds the canvas in either axis.
//! 3. Center on a black canvas.
//! 4. Composite the optional overlay at the canvas origin using its alpha.
//! 5. Encode as PNG with the project name in a `Description` text chunk.
//!
//! Everything up to encoding is a pure function of its inputs.

use crate::cache;
use crate::error::TransformError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use reviewrec_common::config::DEFAULT_CANVAS;
use reviewrec_common::{CapturedFrame, PixelLayout};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension of final images.
pub const IMAGE_EXT: &str = "png";

/// Metadata keyword the project tag is stored under.
pub const TAG_KEYWORD: &str = "Description";

/// Fixed output frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    /// Canvas with zero dimensions replaced by the defaults.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: if width == 0 { DEFAULT_CANVAS.0 } else { width },
            height: if height == 0 { DEFAULT_CANVAS.1 } else { height },
        }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(DEFAULT_CANVAS.0, DEFAULT_CANVAS.1)
    }
}

/// Where a frame lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Frame size after scaling.
    pub scaled: (u32, u32),
    /// Top-left corner on the canvas.
    pub offset: (u32, u32),
}

/// Compute the scaled size and centering offset of a `width`x`height` frame.
///
/// Frames that fit are left at their size; larger ones are scaled uniformly
/// by `min(canvas_w / w, canvas_h / h)`.
pub fn fit_to_canvas(width: u32, height: u32, canvas: Canvas) -> Placement {
    let scaled = if width > canvas.width || height > canvas.height {
        let scale = (canvas.width as f64 / width as f64).min(canvas.height as f64 / height as f64);
        let w = ((width as f64 * scale).round() as u32).clamp(1, canvas.width);
        let h = ((height as f64 * scale).round() as u32).clamp(1, canvas.height);
        (w, h)
    } else {
        (width, height)
    };

    Placement {
        scaled,
        offset: (
            (canvas.width - scaled.0) / 2,
            (canvas.height - scaled.1) / 2,
        ),
    }
}

/// Reinterpret a raw frame as RGB.
pub fn to_rgb(frame: &CapturedFrame) -> Result<RgbImage, TransformError> {
    let expected = CapturedFrame::expected_len(frame.width, frame.height);
    if frame.data.len() != expected {
        return Err(TransformError::Encode(format!(
            "Frame {} holds {} bytes, expected {}",
            frame.sequence,
            frame.data.len(),
            expected
        )));
    }

    let (r, b) = match frame.layout {
        PixelLayout::Rgba => (0, 2),
        PixelLayout::Bgra => (2, 0),
    };
    let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
    for px in frame.data.chunks_exact(4) {
        rgb.extend_from_slice(&[px[r], px[1], px[b]]);
    }

    RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| TransformError::Encode("Failed to create image buffer".into()))
}

/// Fit an RGB image onto the canvas and apply the overlay.
pub fn conform(image: &RgbImage, canvas: Canvas, overlay: Option<&RgbaImage>) -> RgbImage {
    let placement = fit_to_canvas(image.width(), image.height(), canvas);

    let mut base = RgbImage::new(canvas.width, canvas.height);
    if placement.scaled == image.dimensions() {
        imageops::replace(
            &mut base,
            image,
            placement.offset.0 as i64,
            placement.offset.1 as i64,
        );
    } else {
        let resized = imageops::resize(
            image,
            placement.scaled.0,
            placement.scaled.1,
            FilterType::Lanczos3,
        );
        imageops::replace(
            &mut base,
            &resized,
            placement.offset.0 as i64,
            placement.offset.1 as i64,
        );
    }

    match overlay {
        Some(overlay) => {
            let mut composed = DynamicImage::ImageRgb8(base).into_rgba8();
            imageops::overlay(&mut composed, overlay, 0, 0);
            DynamicImage::ImageRgba8(composed).into_rgb8()
        }
        None => base,
    }
}

/// Convert one raw frame into the final canvas image.
pub fn transform(
    frame: &CapturedFrame,
    canvas: Canvas,
    overlay: Option<&RgbaImage>,
) -> Result<RgbImage, TransformError> {
    let rgb = to_rgb(frame)?;
    Ok(conform(&rgb, canvas, overlay))
}

/// `{prefix}_{sequence:04}.png`
pub fn output_path(prefix: &Path, sequence: u32) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!("_{:04}.{}", sequence, IMAGE_EXT));
    PathBuf::from(name)
}

/// Encode `image` as PNG with `tag` stored as its description.
pub fn write_image(
    image: &RgbImage,
    prefix: &Path,
    sequence: u32,
    tag: &str,
) -> Result<PathBuf, TransformError> {
    let path = output_path(prefix, sequence);
    let unwritable = |reason: String| TransformError::DestinationUnwritable {
        path: path.clone(),
        reason,
    };

    let file = File::create(&path).map_err(|e| unwritable(e.to_string()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), image.width(), image.height());
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Default);
    encoder
        .add_text_chunk(TAG_KEYWORD.to_string(), tag.to_string())
        .map_err(|e| TransformError::Encode(format!("Invalid description tag: {}", e)))?;

    let mut writer = encoder
        .write_header()
        .map_err(|e| unwritable(e.to_string()))?;
    writer
        .write_image_data(image.as_raw())
        .map_err(|e| unwritable(e.to_string()))?;
    writer.finish().map_err(|e| unwritable(e.to_string()))?;

    debug!("Wrote {:?}", path);
    Ok(path)
}

/// Decode the overlay image. A missing file is not an error.
pub fn load_overlay(path: &Path) -> Result<Option<RgbaImage>, TransformError> {
    if !path.is_file() {
        info!("No overlay at {:?}", path);
        return Ok(None);
    }
    let decoded = image::open(path).map_err(|e| TransformError::Overlay {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(decoded.into_rgba8()))
}

/// Read, convert and write one cache entry.
pub fn process_entry(
    source: &Path,
    prefix: &Path,
    sequence: u32,
    tag: &str,
    canvas: Canvas,
    overlay: Option<&RgbaImage>,
) -> Result<PathBuf, TransformError> {
    let frame = cache::read_frame(source).map_err(TransformError::SourceUnreadable)?;
    let image = transform(&frame, canvas, overlay)?;
    write_image(&image, prefix, sequence, tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use image::{Rgb, Rgba};
    use std::fs;
    use tempfile::TempDir;

    fn frame(width: u32, height: u32, layout: PixelLayout, pixel: [u8; 4]) -> CapturedFrame {
        CapturedFrame {
            sequence: 0,
            width,
            height,
            layout,
            data: pixel.repeat((width * height) as usize),
            captured_at: Local::now(),
        }
    }

    /// Deterministic, non-uniform frame.
    fn gradient(width: u32, height: u32) -> CapturedFrame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 7) as u8, (y * 13) as u8, ((x + y) * 3) as u8, 255]);
            }
        }
        CapturedFrame {
            sequence: 3,
            width,
            height,
            layout: PixelLayout::Bgra,
            data,
            captured_at: Local::now(),
        }
    }

    #[test]
    fn test_canvas_sized_frame_is_not_scaled() {
        let placement = fit_to_canvas(1920, 1080, Canvas::default());
        assert_eq!(placement.scaled, (1920, 1080));
        assert_eq!(placement.offset, (0, 0));
    }

    #[test]
    fn test_small_frame_is_centered() {
        let placement = fit_to_canvas(800, 600, Canvas::default());
        assert_eq!(placement.scaled, (800, 600));
        assert_eq!(placement.offset, (560, 240));
    }

    #[test]
    fn test_large_frame_is_downscaled_uniformly() {
        let placement = fit_to_canvas(3840, 2160, Canvas::default());
        assert_eq!(placement.scaled, (1920, 1080));
        assert_eq!(placement.offset, (0, 0));

        // Taller than the canvas only: height limits the scale.
        let placement = fit_to_canvas(1000, 2160, Canvas::default());
        assert_eq!(placement.scaled, (500, 1080));
        assert_eq!(placement.offset, (710, 0));
    }

    #[test]
    fn test_zero_canvas_falls_back() {
        assert_eq!(Canvas::new(0, 0), Canvas::default());
    }

    #[test]
    fn test_to_rgb_reorders_bgra() {
        let rgb = to_rgb(&frame(2, 1, PixelLayout::Bgra, [10, 20, 30, 255])).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([30, 20, 10]));

        let rgb = to_rgb(&frame(2, 1, PixelLayout::Rgba, [10, 20, 30, 0])).unwrap();
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_to_rgb_rejects_short_buffer() {
        let mut bad = frame(2, 2, PixelLayout::Rgba, [0, 0, 0, 0]);
        bad.data.truncate(5);
        assert!(matches!(to_rgb(&bad), Err(TransformError::Encode(_))));
    }

    #[test]
    fn test_transform_centers_on_black_canvas() {
        let canvas = Canvas::new(8, 6);
        let out = transform(&frame(4, 2, PixelLayout::Rgba, [200, 100, 50, 255]), canvas, None)
            .unwrap();
        assert_eq!(out.dimensions(), (8, 6));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(2, 2), &Rgb([200, 100, 50]));
        assert_eq!(out.get_pixel(5, 3), &Rgb([200, 100, 50]));
        assert_eq!(out.get_pixel(6, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_transform_downscales_to_canvas() {
        let canvas = Canvas::new(16, 9);
        let out = transform(&gradient(64, 36), canvas, None).unwrap();
        assert_eq!(out.dimensions(), (16, 9));
    }

    #[test]
    fn test_overlay_respects_alpha() {
        let canvas = Canvas::new(4, 4);
        let mut overlay = RgbaImage::new(4, 4);
        overlay.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        overlay.put_pixel(1, 0, Rgba([255, 0, 0, 0]));

        let out = transform(
            &frame(4, 4, PixelLayout::Rgba, [0, 0, 255, 255]),
            canvas,
            Some(&overlay),
        )
        .unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([0, 0, 255]));
        assert_eq!(out.get_pixel(3, 3), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_output_path_format() {
        let path = output_path(Path::new("/review/2024-06-04/ann/shot_a/shot_a"), 7);
        assert_eq!(path, PathBuf::from("/review/2024-06-04/ann/shot_a/shot_a_0007.png"));
    }

    #[test]
    fn test_repeated_transform_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let canvas = Canvas::new(32, 18);
        let source = gradient(50, 40);

        let first = transform(&source, canvas, None).unwrap();
        let second = transform(&source, canvas, None).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());

        let a = write_image(&first, &dir.path().join("a"), 1, "testing").unwrap();
        let b = write_image(&second, &dir.path().join("b"), 1, "testing").unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn test_written_image_carries_tag() {
        let dir = TempDir::new().unwrap();
        let image = transform(&gradient(10, 10), Canvas::new(12, 12), None).unwrap();
        let path = write_image(&image, &dir.path().join("clip"), 12, "Atlas").unwrap();
        assert!(path.ends_with("clip_0012.png"));

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        let texts = &reader.info().uncompressed_latin1_text;
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].keyword, TAG_KEYWORD);
        assert_eq!(texts[0].text, "Atlas");

        let decoded = image::open(&path).unwrap().into_rgb8();
        assert_eq!(decoded.as_raw(), image.as_raw());
    }

    #[test]
    fn test_unwritable_destination_is_reported() {
        let dir = TempDir::new().unwrap();
        let image = RgbImage::new(2, 2);
        let result = write_image(&image, &dir.path().join("missing").join("clip"), 0, "t");
        assert!(matches!(
            result,
            Err(TransformError::DestinationUnwritable { .. })
        ));
    }

    #[test]
    fn test_process_entry_reports_unreadable_source() {
        let dir = TempDir::new().unwrap();
        let result = process_entry(
            &dir.path().join("frame_0000.rrf"),
            &dir.path().join("clip"),
            0,
            "t",
            Canvas::new(4, 4),
            None,
        );
        assert!(matches!(result, Err(TransformError::SourceUnreadable(_))));
    }

    #[test]
    fn test_process_entry_from_cache() {
        let dir = TempDir::new().unwrap();
        let entry = cache::write_frame(dir.path(), &gradient(6, 4)).unwrap();
        let out = process_entry(&entry, &dir.path().join("clip"), 5, "t", Canvas::new(8, 8), None)
            .unwrap();
        assert!(out.ends_with("clip_0005.png"));
    }

    #[test]
    fn test_missing_overlay_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_overlay(&dir.path().join("swatch.png")).unwrap().is_none());
    }

    #[test]
    fn test_overlay_loads_from_disk() {
        let dir = TempDir::new().unwrap();
        let swatch = dir.path().join("swatch.png");
        RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 128])).save(&swatch).unwrap();
        let overlay = load_overlay(&swatch).unwrap().unwrap();
        assert_eq!(overlay.get_pixel(1, 1), &Rgba([1, 2, 3, 128]));
    }

    #[test]
    fn test_corrupt_overlay_is_error() {
        let dir = TempDir::new().unwrap();
        let swatch = dir.path().join("swatch.png");
        fs::write(&swatch, b"not an image").unwrap();
        assert!(matches!(
            load_overlay(&swatch),
            Err(TransformError::Overlay { .. })
        ));
    }
}
