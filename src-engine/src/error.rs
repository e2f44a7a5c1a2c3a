//! Error types for cache, capture, transform and calendar operations.

use std::fmt;
use std::path::PathBuf;

/// Error type for cache directory and cache entry operations.
#[derive(Debug)]
pub enum CacheError {
    /// Cache directory could not be created
    Unavailable { path: PathBuf, reason: String },
    /// Reading or writing an entry failed
    Io { path: PathBuf, source: std::io::Error },
    /// Entry exists but its header or payload is invalid
    Corrupt { path: PathBuf, reason: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Unavailable { path, reason } => {
                write!(f, "Cache directory {:?} unavailable: {}", path, reason)
            }
            CacheError::Io { path, source } => write!(f, "Cache I/O on {:?}: {}", path, source),
            CacheError::Corrupt { path, reason } => {
                write!(f, "Corrupt cache entry {:?}: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Error type for capture operations.
#[derive(Debug)]
pub enum CaptureError {
    /// Session cache directory could not be created; nothing was captured
    CacheUnavailable(String),
    /// A single frame could not be grabbed or persisted
    FrameCaptureFailure(String),
    /// Region outside the supported bounds
    InvalidRegion(String),
    /// Command not valid in the current session state
    InvalidState(String),
    /// Screen grabbing is not compiled into this build
    Unsupported(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::CacheUnavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            CaptureError::FrameCaptureFailure(msg) => write!(f, "Frame capture failed: {}", msg),
            CaptureError::InvalidRegion(msg) => write!(f, "Invalid region: {}", msg),
            CaptureError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            CaptureError::Unsupported(msg) => write!(f, "Not supported: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<CacheError> for CaptureError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable { .. } => CaptureError::CacheUnavailable(err.to_string()),
            other => CaptureError::FrameCaptureFailure(other.to_string()),
        }
    }
}

/// Per-job failure while converting one cached frame.
#[derive(Debug)]
pub enum TransformError {
    /// Source cache entry missing or unreadable
    SourceUnreadable(CacheError),
    /// Overlay image could not be decoded
    Overlay { path: PathBuf, reason: String },
    /// Pixel data could not be assembled or encoded
    Encode(String),
    /// Destination file could not be written
    DestinationUnwritable { path: PathBuf, reason: String },
    /// The conversion panicked
    Panicked(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::SourceUnreadable(err) => write!(f, "Source unreadable: {}", err),
            TransformError::Overlay { path, reason } => {
                write!(f, "Overlay {:?} unusable: {}", path, reason)
            }
            TransformError::Encode(msg) => write!(f, "Encoding failed: {}", msg),
            TransformError::DestinationUnwritable { path, reason } => {
                write!(f, "Cannot write {:?}: {}", path, reason)
            }
            TransformError::Panicked(msg) => write!(f, "Conversion panicked: {}", msg),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransformError::SourceUnreadable(err) => Some(err),
            _ => None,
        }
    }
}

/// The delivery calendar found no valid day inside its bounded scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    pub start: chrono::NaiveDate,
    pub days_scanned: u32,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "No delivery day found within {} days after {}",
            self.days_scanned, self.start
        )
    }
}

impl std::error::Error for ResolutionError {}

/// Error type for recording session orchestration.
#[derive(Debug)]
pub enum SessionError {
    /// Operation not valid in the current recorder state
    InvalidState(String),
    /// Clip name or project tag rejected
    InvalidInput(String),
    Capture(CaptureError),
    Resolution(ResolutionError),
    /// Review folder could not be prepared
    Output(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidState(msg) => write!(f, "{}", msg),
            SessionError::InvalidInput(msg) => write!(f, "{}", msg),
            SessionError::Capture(err) => write!(f, "{}", err),
            SessionError::Resolution(err) => write!(f, "{}", err),
            SessionError::Output(msg) => write!(f, "Output folder error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        SessionError::Capture(err)
    }
}

impl From<ResolutionError> for SessionError {
    fn from(err: ResolutionError) -> Self {
        SessionError::Resolution(err)
    }
}

impl From<reviewrec_common::validation::ValidationError> for SessionError {
    fn from(err: reviewrec_common::validation::ValidationError) -> Self {
        SessionError::InvalidInput(err.to_string())
    }
}
