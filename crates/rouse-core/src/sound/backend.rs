//! Audio playback backend trait
//!
//! Platform audio services implement this; the sound engine is the only caller.

use std::fmt;

use super::error::AudioResult;

/// Output session policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSessionOptions {
    /// Keep the session alive while the app is backgrounded
    pub stays_active_in_background: bool,
    /// Let other apps' audio play alongside
    pub mix_with_others: bool,
    /// Obey the device's silent/mute switch
    pub respect_silent_switch: bool,
}

impl AudioSessionOptions {
    /// Alarm policy: background-capable, exclusive, ignores the mute switch
    pub fn alarm() -> Self {
        Self {
            stays_active_in_background: true,
            mix_with_others: false,
            respect_silent_switch: false,
        }
    }
}

/// Playback parameters for a loaded sound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    pub looping: bool,
    /// 0.0 - 1.0
    pub volume: f32,
}

/// Backend-assigned handle for a loaded sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u64);

impl fmt::Display for SoundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sound#{}", self.0)
    }
}

/// Status update pushed by the backend while a sound is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackStatus {
    /// Playback reached the end of the sound
    pub did_just_finish: bool,
    pub is_looping: bool,
}

/// Callback receiving playback status updates, possibly from a backend thread
pub type StatusObserver = Box<dyn Fn(PlaybackStatus) + Send + Sync>;

/// Platform audio playback service
pub trait AudioPlayback: Send {
    fn configure_session(&mut self, options: &AudioSessionOptions) -> AudioResult<()>;

    /// Load `source` (URI or path). Playback does not start until `play`.
    fn load(&mut self, source: &str, options: LoadOptions) -> AudioResult<SoundHandle>;

    fn play(&mut self, handle: SoundHandle) -> AudioResult<()>;

    fn stop(&mut self, handle: SoundHandle) -> AudioResult<()>;

    fn unload(&mut self, handle: SoundHandle) -> AudioResult<()>;

    fn is_loaded(&self, handle: SoundHandle) -> bool;

    fn set_status_observer(&mut self, handle: SoundHandle, observer: StatusObserver);
}
