//! Exit codes for the CLI.
//!
//! These codes enable scripting integration by providing structured
//! feedback about operation results.

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments or clip/project names
    InvalidArguments = 2,
    /// Recording failed to start
    RecordingFailedToStart = 3,
    /// Recording failed during capture
    RecordingFailedDuringCapture = 4,
    /// Some or all frames could not be converted
    ProcessingFailed = 5,
    /// No delivery day found within the calendar window
    NoDeliveryDate = 6,
    /// User cancelled the recording or the conversion
    UserCancelled = 7,
    /// Settings file could not be read or written
    ConfigError = 8,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::RecordingFailedToStart => write!(f, "recording failed to start"),
            ExitCode::RecordingFailedDuringCapture => write!(f, "recording failed during capture"),
            ExitCode::ProcessingFailed => write!(f, "processing failed"),
            ExitCode::NoDeliveryDate => write!(f, "no delivery date"),
            ExitCode::UserCancelled => write!(f, "user cancelled"),
            ExitCode::ConfigError => write!(f, "config error"),
        }
    }
}
