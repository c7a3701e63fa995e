//! Rouse settings
//!
//! The timing values below are empirically tuned; every one of them is
//! overridable from `config.yaml`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sound reference used when the config names none
pub const DEFAULT_SOUND_SOURCE: &str =
    "https://actions.google.com/sounds/v1/alarms/digital_watch_alarm_long.ogg";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouseConfig {
    /// Engine tunables
    pub timing: TimingConfig,
    /// Alarm sound settings
    pub sound: SoundConfig,
    /// Re-arm an alarm for the next day once its session ends.
    /// When false the alarm is switched off after it fires.
    pub repeat_daily: bool,
}

impl Default for RouseConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            sound: SoundConfig::default(),
            repeat_daily: true,
        }
    }
}

/// Timing section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// A wake event delivered more than this ahead of its target time is
    /// treated as early and deferred. Covers platform delivery jitter.
    pub early_tolerance_ms: u64,
    /// Presence polling interval
    pub tick_interval_ms: u64,
    /// Progress gained per tick while presence holds (1..=100)
    pub progress_step: u8,
    /// How long the single-flight guard stays held after a session starts,
    /// absorbing late duplicate deliveries
    pub release_delay_ms: u64,
    /// Upper bound on a stuck acquisition; after this the guard auto-releases
    pub lock_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            early_tolerance_ms: 3_000,
            tick_interval_ms: 1_000,
            progress_step: 40, // ~2.5 ticks to full progress
            release_delay_ms: 2_000,
            lock_timeout_ms: 10_000,
        }
    }
}

impl TimingConfig {
    pub fn early_tolerance(&self) -> Duration {
        Duration::from_millis(self.early_tolerance_ms)
    }

    /// Never zero, a zero interval would spin the polling loop
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Clamped to 1..=100 so progress always advances
    pub fn progress_step(&self) -> u8 {
        self.progress_step.clamp(1, 100)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Number of consecutive presence ticks needed for dismissal
    pub fn ticks_to_dismiss(&self) -> u32 {
        let step = u32::from(self.progress_step());
        (100 + step - 1) / step
    }
}

/// Sound section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// URI or file path of the alarm sound
    pub source: String,
    /// Playback volume (0.0 - 1.0)
    pub volume: f32,
    /// Loop until stopped
    pub looping: bool,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOUND_SOURCE.to_string(),
            volume: 1.0,
            looping: true,
        }
    }
}
