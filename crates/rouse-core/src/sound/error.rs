//! Audio playback error types

use thiserror::Error;

/// Errors reported by an audio playback backend or the sound engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// Output session could not be configured
    #[error("Failed to configure audio session: {0}")]
    Session(String),

    /// No usable output device
    #[error("Audio device unavailable: {0}")]
    Device(String),

    /// Sound resource could not be loaded
    #[error("Failed to load alarm sound: {0}")]
    Load(String),

    #[error("Failed to start playback: {0}")]
    Play(String),

    #[error("Failed to stop playback: {0}")]
    Stop(String),

    #[error("Failed to release sound: {0}")]
    Unload(String),

    /// The engine was torn down and accepts no more playback
    #[error("Sound engine has been torn down")]
    TornDown,
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
