//! Review recorder common library
//!
//! Shared types, settings snapshot, input validation and log paths used by
//! the capture engine and the command-line front end.

pub mod config;
pub mod logging;
pub mod types;
pub mod validation;

pub use config::Settings;
pub use types::*;
