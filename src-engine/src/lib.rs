//! Review recorder engine
//!
//! The capture-to-deliverable pipeline:
//! - [`capture`]: sample a screen region into the frame cache
//! - [`cache`]: on-disk frame entries and session folders
//! - [`transform`]: conform one cached frame to the review canvas
//! - [`processing`]: convert a whole session on a worker pool
//! - [`slate`]: the titled frame 0 of a sequence
//! - [`calendar`]: pick the delivery day
//! - [`session`]: drive the above as one recording lifecycle

pub mod cache;
pub mod calendar;
pub mod capture;
pub mod error;
pub mod processing;
pub mod session;
pub mod slate;
pub mod transform;

pub use error::{CacheError, CaptureError, ResolutionError, SessionError, TransformError};
pub use session::{RecordingManager, SessionEvent};
