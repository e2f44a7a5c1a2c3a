//! Input validation for capture regions, clip names and project tags.

use crate::types::CaptureRegion;
use once_cell::sync::Lazy;
use regex::Regex;

/// Project tags end up embedded in image metadata and folder names.
static PROJECT_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _.\-]{0,63}$").unwrap());

/// Characters allowed in clip names besides ASCII letters.
const CLIP_EXTRA_CHARACTERS: &str = " _-0123456789";

/// Maximum coordinate value (positive or negative)
pub const MAX_COORDINATE: i32 = 65535;

/// Maximum dimension value (must be positive)
pub const MAX_DIMENSION: u32 = 16384;

/// Maximum clip name length after sanitizing.
pub const MAX_CLIP_NAME: usize = 64;

/// Validation error types.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Dimension (width/height) is out of valid range
    DimensionOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    /// Coordinate (x/y) is out of valid range
    CoordinateOutOfRange { field: &'static str, value: i32 },
    /// Clip name is empty once illegal characters are removed
    EmptyClipName,
    /// String field exceeds maximum length
    StringTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    /// Project name contains invalid characters or is empty
    InvalidProjectName(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::DimensionOutOfRange { field, value, max } => {
                write!(f, "{} out of range: {} (max {})", field, value, max)
            }
            ValidationError::CoordinateOutOfRange { field, value } => {
                write!(f, "{} out of range: {}", field, value)
            }
            ValidationError::EmptyClipName => write!(f, "Set a name for your clip"),
            ValidationError::StringTooLong { field, len, max } => {
                write!(f, "{} too long: {} chars (max {})", field, len, max)
            }
            ValidationError::InvalidProjectName(name) => {
                write!(f, "Invalid project name: {:?}", name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate region coordinates and dimensions.
pub fn validate_region(region: &CaptureRegion) -> Result<(), ValidationError> {
    for (field, value) in [("x", region.x), ("y", region.y)] {
        if !(-MAX_COORDINATE..=MAX_COORDINATE).contains(&value) {
            return Err(ValidationError::CoordinateOutOfRange { field, value });
        }
    }
    for (field, value) in [("width", region.width), ("height", region.height)] {
        if value == 0 || value > MAX_DIMENSION {
            return Err(ValidationError::DimensionOutOfRange {
                field,
                value,
                max: MAX_DIMENSION,
            });
        }
    }
    Ok(())
}

/// Strip characters that would break folder names or later archiving.
///
/// Keeps ASCII letters, digits, space, `_` and `-`, then trims whitespace.
pub fn sanitize_clip_name(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || CLIP_EXTRA_CHARACTERS.contains(*c))
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        return Err(ValidationError::EmptyClipName);
    }
    if cleaned.len() > MAX_CLIP_NAME {
        return Err(ValidationError::StringTooLong {
            field: "clip name",
            len: cleaned.len(),
            max: MAX_CLIP_NAME,
        });
    }
    Ok(cleaned)
}

/// Validate a project tag.
pub fn validate_project_name(name: &str) -> Result<(), ValidationError> {
    if !PROJECT_NAME_PATTERN.is_match(name) {
        return Err(ValidationError::InvalidProjectName(name.to_string()));
    }
    Ok(())
}
