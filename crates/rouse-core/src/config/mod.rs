//! Configuration for rouse
//!
//! YAML-backed settings for the engine tunables (early-delivery tolerance,
//! presence polling cadence, single-flight timings) and the alarm sound.
//!
//! # Usage
//!
//! ```ignore
//! use rouse_core::config::{default_config_path, load_config, RouseConfig};
//!
//! let config: RouseConfig = load_config(&default_config_path());
//! let tolerance = config.timing.early_tolerance();
//! ```

mod io;
mod paths;
mod settings;

pub use io::{load_config, read_config, save_config};
pub use paths::{config_dir, default_config_path};
pub use settings::{RouseConfig, SoundConfig, TimingConfig, DEFAULT_SOUND_SOURCE};
