//! Error types for rouse
//!
//! Fatal and recoverable failures are kept apart: scheduling failures
//! propagate to the caller, playback failures degrade to a silent session,
//! and detection failures never leave the polling loop.

use thiserror::Error;

use crate::sound::AudioError;
use crate::types::AlarmId;

/// Errors surfaced by the alarm engine
#[derive(Error, Debug)]
pub enum AlarmError {
    /// The wake-event layer refused to arm an event. The alarm is unarmed.
    #[error("Failed to schedule wake event: {0}")]
    SchedulingFailed(String),

    /// Alarm audio could not start. The session continues silently.
    #[error("Alarm playback failed: {0}")]
    PlaybackFailed(#[from] AudioError),

    /// A frame could not be captured (transient)
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// A captured frame could not be classified (transient)
    #[error("Classification failed: {0}")]
    ClassifyFailed(String),

    #[error("Unknown alarm: {0}")]
    UnknownAlarm(AlarmId),

    #[error("Invalid time of day: {0}")]
    InvalidTimeOfDay(String),

    #[error("Invalid dismiss mode: {0}")]
    InvalidDismissMode(String),

    /// The alarm service thread is gone or did not reply
    #[error("Alarm service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AlarmError {
    /// Whether the engine keeps running normally after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AlarmError::PlaybackFailed(_) | AlarmError::CaptureFailed(_) | AlarmError::ClassifyFailed(_)
        )
    }
}

/// Result type for engine operations
pub type AlarmResult<T> = Result<T, AlarmError>;

/// Errors from the capture/classification service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    /// Camera could not be opened for this session
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("Presence classification failed: {0}")]
    Classify(String),
}

impl From<DetectionError> for AlarmError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::DeviceUnavailable(msg) | DetectionError::Capture(msg) => {
                AlarmError::CaptureFailed(msg)
            }
            DetectionError::Classify(msg) => AlarmError::ClassifyFailed(msg),
        }
    }
}

/// Error returned by the wake-event layer when arming fails
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct WakeLayerError(pub String);

impl From<WakeLayerError> for AlarmError {
    fn from(err: WakeLayerError) -> Self {
        AlarmError::SchedulingFailed(err.0)
    }
}
