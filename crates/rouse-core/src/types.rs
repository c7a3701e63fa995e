//! Shared types for rouse
//!
//! Plain data carried between the scheduler, the trigger arbiter and the
//! dismissal verifiers. None of these types own external resources.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{AlarmError, AlarmResult};

/// Full progress value for presence verification
pub const PROGRESS_COMPLETE: u8 = 100;

// ============================================================================
// Time of day
// ============================================================================

/// A daily wall-clock time (hour and minute, seconds are always zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Create a time of day, rejecting out-of-range values
    pub fn new(hour: u8, minute: u8) -> AlarmResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(AlarmError::InvalidTimeOfDay(format!("{}:{}", hour, minute)));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = AlarmError;

    /// Parse `HH:MM` (24-hour clock)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AlarmError::InvalidTimeOfDay(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<u8>().map_err(|_| invalid())?;
        let minute = minute.parse::<u8>().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

// ============================================================================
// Dismissal mode
// ============================================================================

/// How a ringing session proves the user is awake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissMode {
    /// Sustained presence in front of the camera
    #[default]
    #[serde(alias = "face")]
    Presence,
    /// Any single well-formed code scan
    #[serde(alias = "qr")]
    SingleScan,
}

impl fmt::Display for DismissMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DismissMode::Presence => write!(f, "presence"),
            DismissMode::SingleScan => write!(f, "single-scan"),
        }
    }
}

impl FromStr for DismissMode {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "presence" | "face" => Ok(DismissMode::Presence),
            "single-scan" | "single_scan" | "scan" | "qr" => Ok(DismissMode::SingleScan),
            other => Err(AlarmError::InvalidDismissMode(other.to_string())),
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Process-local alarm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlarmId(pub u64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alarm#{}", self.0)
    }
}

/// Identifier of one ringing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Opaque handle returned by the wake-event layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WakeHandle(String);

impl WakeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Alarm and wake payload
// ============================================================================

/// A daily alarm owned by the alarm collection
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub id: AlarmId,
    pub time_of_day: TimeOfDay,
    pub label: String,
    pub active: bool,
    pub dismiss_mode: DismissMode,
    /// Outstanding wake event, present only while the alarm is armed
    pub wake_handle: Option<WakeHandle>,
    /// Absolute time the outstanding wake event targets
    pub next_fire: Option<NaiveDateTime>,
}

/// Payload carried by the wake-event layer and handed back on delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakePayload {
    pub target_time: NaiveDateTime,
    pub label: String,
    pub dismiss_mode: DismissMode,
    /// Alarm that armed this event, if it came from the collection
    pub alarm_id: Option<AlarmId>,
}

// ============================================================================
// Ringing session
// ============================================================================

/// The live record of an alarm that is sounding and awaiting dismissal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingingSession {
    pub id: SessionId,
    pub label: String,
    pub dismiss_mode: DismissMode,
    pub started_at: NaiveDateTime,
    /// Target time of the wake event that started the session
    pub target_time: NaiveDateTime,
    pub alarm_id: Option<AlarmId>,
}

/// Why a ringing session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The dismissal verifier accepted proof of wakefulness
    Dismissed,
    /// Stopped without verification (emergency stop)
    Forced,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Dismissed => write!(f, "dismissed"),
            SessionEnd::Forced => write!(f, "forced"),
        }
    }
}

/// Presence-mode evidence, exposed for progress display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionState {
    pub presence_observed: bool,
    /// 0..=100
    pub progress: u8,
}
