//! Terminal color support for CLI output.
//!
//! Colors are applied only when the stream is a terminal, so piped output
//! stays plain.

use owo_colors::OwoColorize;
use std::io::IsTerminal;

const PROGRESS_WIDTH: usize = 30;

/// Check if stdout is a terminal (interactive mode).
pub fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}

/// Check if stderr is a terminal (interactive mode).
pub fn is_stderr_interactive() -> bool {
    std::io::stderr().is_terminal()
}

/// Style for error messages.
pub fn error(msg: &str) -> String {
    if is_stderr_interactive() {
        format!("{} {}", "error:".red().bold(), msg)
    } else {
        format!("error: {}", msg)
    }
}

/// Style for warning messages.
pub fn warning(msg: &str) -> String {
    if is_stderr_interactive() {
        format!("{} {}", "warning:".yellow().bold(), msg)
    } else {
        format!("warning: {}", msg)
    }
}

/// Style for success messages.
pub fn success(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.green())
    } else {
        msg.to_string()
    }
}

/// Style for info/status messages.
pub fn info(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.cyan())
    } else {
        msg.to_string()
    }
}

/// Style for dim/secondary text.
pub fn dim(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.dimmed())
    } else {
        msg.to_string()
    }
}

pub fn bold(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.bold())
    } else {
        msg.to_string()
    }
}

/// Style for the recording indicator.
pub fn recording(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.red().bold())
    } else {
        msg.to_string()
    }
}

/// Style for file paths.
pub fn path(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.underline())
    } else {
        msg.to_string()
    }
}

/// Style for counts.
pub fn number(msg: &str) -> String {
    if is_interactive() {
        format!("{}", msg.cyan())
    } else {
        msg.to_string()
    }
}

/// Elapsed `MM:SS` value.
pub fn elapsed_time(elapsed: &str) -> String {
    if is_interactive() {
        format!("{}", elapsed.yellow().bold())
    } else {
        elapsed.to_string()
    }
}

/// Format state name with appropriate color.
pub fn state(state: &str) -> String {
    if !is_interactive() {
        return state.to_string();
    }

    match state {
        "idle" => format!("{}", state.dimmed()),
        "recording" => format!("{}", state.red().bold()),
        "paused" => format!("{}", state.yellow()),
        "processing" => format!("{}", state.cyan()),
        _ => state.to_string(),
    }
}

/// Text progress bar for a completed fraction.
pub fn progress_bar(fraction: f64) -> String {
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = (fraction * PROGRESS_WIDTH as f64).round() as usize;
    let bar = format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(PROGRESS_WIDTH - filled),
        (fraction * 100.0).round() as u32
    );
    if is_interactive() {
        format!("{}", bar.green())
    } else {
        bar
    }
}
