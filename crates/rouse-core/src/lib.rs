//! Rouse Core - alarm lifecycle and dismissal verification
//!
//! Arms daily wake events, turns unreliable (early, duplicated) deliveries
//! into exactly one ringing session, and keeps the alarm sounding until the
//! user proves they are awake by a sustained presence check or a code scan.

pub mod alarms;
pub mod arbiter;
pub mod clock;
pub mod config;
pub mod detection;
pub mod dismissal;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod services;
pub mod sound;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{AlarmError, AlarmResult, DetectionError, WakeLayerError};
pub use types::*;
