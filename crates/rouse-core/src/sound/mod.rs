//! Alarm audio
//!
//! [`SoundEngine`] is the only owner of the alarm sound resource. It wraps a
//! platform [`AudioPlayback`] backend and makes `play`/`stop` idempotent so
//! duplicate wake deliveries and repeated stop requests are harmless.
//!
//! # Example Usage
//!
//! ```ignore
//! use rouse_core::sound::SoundEngine;
//!
//! let engine = Arc::new(SoundEngine::new(Box::new(backend), config.sound));
//! engine.play()?;          // loads and loops the alarm sound
//! engine.play()?;          // no-op, already playing
//! engine.stop();           // stops and releases
//! engine.stop();           // no-op
//! ```

mod backend;
mod engine;
mod error;

pub use backend::{AudioPlayback, AudioSessionOptions, LoadOptions, PlaybackStatus, SoundHandle, StatusObserver};
pub use engine::SoundEngine;
pub use error::{AudioError, AudioResult};
