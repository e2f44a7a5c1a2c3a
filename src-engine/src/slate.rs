//! Slate: frame 0 of a review sequence.
//!
//! The configured background image gets project, clip, user and delivery
//! date written onto it in white, then goes through the same canvas conform
//! and PNG writer as every other frame.

use crate::error::TransformError;
use crate::transform::{conform, write_image, Canvas};
use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Left edge of the text column, in background pixels.
pub const TEXT_X: i32 = 910;

/// Top of each text row: project, clip, user, date.
pub const TEXT_ROWS: [i32; 4] = [314, 393, 474, 553];

pub const FONT_PX: f32 = 46.0;

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Fonts tried when none is configured or the configured one is unusable.
const SYSTEM_FONTS: &[&str] = &[
    "C:\\Windows\\Fonts\\arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// What the slate says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlateText {
    pub project: String,
    pub clip: String,
    pub user: String,
    pub date: String,
}

impl SlateText {
    fn rows(&self) -> [&str; 4] {
        [&self.project, &self.clip, &self.user, &self.date]
    }
}

fn read_font(path: &Path) -> Result<Font, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    Font::from_bytes(bytes, FontSettings::default()).map_err(|e| e.to_string())
}

/// Load the configured font, else the first system font that parses.
pub fn load_font(configured: Option<&Path>) -> Option<Font> {
    if let Some(path) = configured {
        match read_font(path) {
            Ok(font) => return Some(font),
            Err(e) => warn!("Slate font {:?} unusable: {}", path, e),
        }
    }
    for candidate in SYSTEM_FONTS.iter().map(Path::new) {
        if !candidate.is_file() {
            continue;
        }
        match read_font(candidate) {
            Ok(font) => {
                debug!("Slate font {:?}", candidate);
                return Some(font);
            }
            Err(e) => debug!("Skipping font {:?}: {}", candidate, e),
        }
    }
    warn!("No font found, slates are written without text");
    None
}

/// Alpha-blend a coverage bitmap onto `image` with its top-left at (x, y).
///
/// Pixels outside the image are clipped.
pub fn blend_glyph(
    image: &mut RgbImage,
    x: i32,
    y: i32,
    width: usize,
    coverage: &[u8],
    color: Rgb<u8>,
) {
    if width == 0 {
        return;
    }
    let (image_width, image_height) = (image.width() as i64, image.height() as i64);
    for (row, line) in coverage.chunks(width).enumerate() {
        let py = y as i64 + row as i64;
        if py < 0 || py >= image_height {
            continue;
        }
        for (col, alpha) in line.iter().enumerate() {
            let px = x as i64 + col as i64;
            if *alpha == 0 || px < 0 || px >= image_width {
                continue;
            }
            let alpha = u32::from(*alpha);
            let pixel = image.get_pixel_mut(px as u32, py as u32);
            for (channel, target) in pixel.0.iter_mut().zip(color.0) {
                *channel =
                    ((u32::from(target) * alpha + u32::from(*channel) * (255 - alpha)) / 255) as u8;
            }
        }
    }
}

/// Draw one line of text with its top-left corner at (x, y).
pub fn draw_text(image: &mut RgbImage, font: &Font, text: &str, x: i32, y: i32, px: f32) {
    if text.is_empty() {
        return;
    }
    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: x as f32,
        y: y as f32,
        ..LayoutSettings::default()
    });
    layout.append(&[font], &TextStyle::new(text, px, 0));

    for glyph in layout.glyphs() {
        if glyph.width == 0 || glyph.height == 0 {
            continue;
        }
        let (_, coverage) = font.rasterize_config(glyph.key);
        blend_glyph(
            image,
            glyph.x.round() as i32,
            glyph.y.round() as i32,
            glyph.width,
            &coverage,
            TEXT_COLOR,
        );
    }
}

/// Write the slate text onto a background in place.
pub fn annotate(background: &mut RgbImage, text: &SlateText, font: &Font) {
    for (line, top) in text.rows().into_iter().zip(TEXT_ROWS) {
        draw_text(background, font, line, TEXT_X, top, FONT_PX);
    }
}

/// Render the slate background with its text onto the canvas and write it.
///
/// Without a font the background is written as is.
pub fn write_slate(
    background: &Path,
    prefix: &Path,
    sequence: u32,
    text: &SlateText,
    font: Option<&Font>,
    canvas: Canvas,
) -> Result<PathBuf, TransformError> {
    let decoded = image::open(background).map_err(|e| TransformError::Overlay {
        path: background.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut slate = decoded.into_rgb8();
    if let Some(font) = font {
        annotate(&mut slate, text, font);
    }
    let image = conform(&slate, canvas, None);
    let path = write_image(&image, prefix, sequence, &text.project)?;
    info!("Slate written to {:?}", path);
    Ok(path)
}
