//! Process-wide alarm sound engine
//!
//! One engine per process, created by the binary and shared with the
//! arbiter, independent of any ringing session. The backend
//! and the loaded sound live behind a single mutex; the "currently playing"
//! marker is shared separately with the backend's status observer so a
//! playback that ends on its own clears it without touching the backend.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::SoundConfig;

use super::backend::{AudioPlayback, AudioSessionOptions, LoadOptions, PlaybackStatus, SoundHandle};
use super::error::{AudioError, AudioResult};

/// Handle of the sound currently playing, if any
type PlayingMarker = Arc<Mutex<Option<SoundHandle>>>;

struct SoundState {
    backend: Box<dyn AudioPlayback>,
    /// Loaded resource, present from a successful load until release
    loaded: Option<SoundHandle>,
    torn_down: bool,
}

pub struct SoundEngine {
    state: Mutex<SoundState>,
    playing: PlayingMarker,
    sound: SoundConfig,
}

impl SoundEngine {
    pub fn new(backend: Box<dyn AudioPlayback>, sound: SoundConfig) -> Self {
        Self {
            state: Mutex::new(SoundState {
                backend,
                loaded: None,
                torn_down: false,
            }),
            playing: Arc::new(Mutex::new(None)),
            sound,
        }
    }

    /// Start the looping alarm sound
    ///
    /// No-op while already playing. On failure nothing stays loaded and the
    /// engine reports not playing.
    pub fn play(&self) -> AudioResult<()> {
        let mut state = self.lock_state();
        if state.torn_down {
            return Err(AudioError::TornDown);
        }

        if self.current_playing().is_some() && state.loaded.is_some() {
            log::info!("[Sound] Already playing, ignoring start request");
            return Ok(());
        }

        log::info!("[Sound] Starting alarm sound");
        state.backend.configure_session(&AudioSessionOptions::alarm())?;

        // A sound that finished on its own may still be loaded
        Self::release(&mut state);

        let options = LoadOptions {
            looping: self.sound.looping,
            volume: self.sound.volume.clamp(0.0, 1.0),
        };
        let handle = state.backend.load(&self.sound.source, options)?;
        state.loaded = Some(handle);

        let playing = Arc::clone(&self.playing);
        state.backend.set_status_observer(
            handle,
            Box::new(move |status: PlaybackStatus| {
                if status.did_just_finish && !status.is_looping {
                    let mut current = playing.lock().unwrap_or_else(|p| p.into_inner());
                    if *current == Some(handle) {
                        log::info!("[Sound] Playback of {} ended on its own", handle);
                        *current = None;
                    }
                }
            }),
        );

        if let Err(e) = state.backend.play(handle) {
            log::error!("[Sound] Playback failed: {}", e);
            Self::release(&mut state);
            return Err(e);
        }

        *self.lock_playing() = Some(handle);
        Ok(())
    }

    /// Stop and release the alarm sound
    ///
    /// No-op when nothing is loaded. Backend errors are logged; the engine
    /// always ends up not playing with nothing loaded.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if state.loaded.is_none() {
            *self.lock_playing() = None;
            return;
        }

        log::info!("[Sound] Stopping alarm sound");
        Self::release(&mut state);
        *self.lock_playing() = None;
    }

    /// Stop playback and refuse further `play` calls
    pub fn teardown(&self) {
        self.stop();
        self.lock_state().torn_down = true;
        log::info!("[Sound] Engine torn down");
    }

    pub fn is_playing(&self) -> bool {
        self.current_playing().is_some()
    }

    /// Stop and unload the held resource, probing load status first so a
    /// resource the platform already dropped is never stopped or unloaded
    fn release(state: &mut SoundState) {
        let Some(handle) = state.loaded.take() else {
            return;
        };

        if !state.backend.is_loaded(handle) {
            log::debug!("[Sound] {} already released by backend", handle);
            return;
        }
        if let Err(e) = state.backend.stop(handle) {
            log::warn!("[Sound] Error stopping {}: {}", handle, e);
        }
        if let Err(e) = state.backend.unload(handle) {
            log::warn!("[Sound] Error unloading {}: {}", handle, e);
        }
    }

    fn current_playing(&self) -> Option<SoundHandle> {
        *self.lock_playing()
    }

    fn lock_state(&self) -> MutexGuard<'_, SoundState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_playing(&self) -> MutexGuard<'_, Option<SoundHandle>> {
        self.playing.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAudio;

    fn engine() -> (SoundEngine, ScriptedAudio) {
        let audio = ScriptedAudio::new();
        let engine = SoundEngine::new(Box::new(audio.clone()), SoundConfig::default());
        (engine, audio)
    }

    #[test]
    fn test_play_loads_looped_at_full_volume() {
        let (engine, audio) = engine();
        engine.play().unwrap();

        assert!(engine.is_playing());
        assert_eq!(audio.counts().load, 1);
        assert_eq!(audio.counts().play, 1);
        assert_eq!(audio.last_session(), Some(AudioSessionOptions::alarm()));
        let options = audio.last_load_options().unwrap();
        assert!(options.looping);
        assert_eq!(options.volume, 1.0);
    }

    #[test]
    fn test_play_twice_loads_once() {
        let (engine, audio) = engine();
        engine.play().unwrap();
        engine.play().unwrap();

        assert_eq!(audio.counts().load, 1);
        assert_eq!(audio.counts().play, 1);
        assert_eq!(audio.loaded_count(), 1);
    }

    #[test]
    fn test_stop_twice_unloads_once() {
        let (engine, audio) = engine();
        engine.play().unwrap();
        engine.stop();
        engine.stop();

        assert!(!engine.is_playing());
        assert_eq!(audio.counts().stop, 1);
        assert_eq!(audio.counts().unload, 1);
        assert_eq!(audio.loaded_count(), 0);
    }

    #[test]
    fn test_stop_without_play_touches_nothing() {
        let (engine, audio) = engine();
        engine.stop();
        assert_eq!(audio.counts().stop, 0);
        assert_eq!(audio.counts().unload, 0);
    }

    #[test]
    fn test_stop_skips_resource_backend_already_dropped() {
        let (engine, audio) = engine();
        engine.play().unwrap();
        audio.drop_all_loaded();

        engine.stop();
        assert_eq!(audio.counts().stop, 0);
        assert_eq!(audio.counts().unload, 0);
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_load_failure_leaves_engine_idle() {
        let (engine, audio) = engine();
        audio.fail_next_load("network unreachable");

        assert!(matches!(engine.play(), Err(AudioError::Load(_))));
        assert!(!engine.is_playing());
        assert_eq!(audio.loaded_count(), 0);

        // The next attempt starts from scratch
        engine.play().unwrap();
        assert!(engine.is_playing());
    }

    #[test]
    fn test_play_failure_releases_loaded_sound() {
        let (engine, audio) = engine();
        audio.fail_next_play("device busy");

        assert!(matches!(engine.play(), Err(AudioError::Play(_))));
        assert_eq!(audio.loaded_count(), 0);
    }

    #[test]
    fn test_unlooped_finish_clears_playing_and_next_play_reloads() {
        let (engine, audio) = engine();
        engine.play().unwrap();

        audio.emit_status(PlaybackStatus { did_just_finish: true, is_looping: false });
        assert!(!engine.is_playing());

        engine.play().unwrap();
        assert!(engine.is_playing());
        assert_eq!(audio.counts().load, 2);
        // The stale resource was released before reloading
        assert_eq!(audio.counts().unload, 1);
        assert_eq!(audio.loaded_count(), 1);
    }

    #[test]
    fn test_looping_finish_keeps_playing() {
        let (engine, audio) = engine();
        engine.play().unwrap();
        audio.emit_status(PlaybackStatus { did_just_finish: true, is_looping: true });
        assert!(engine.is_playing());
    }

    #[test]
    fn test_teardown_refuses_play() {
        let (engine, audio) = engine();
        engine.play().unwrap();
        engine.teardown();

        assert_eq!(audio.loaded_count(), 0);
        assert_eq!(engine.play(), Err(AudioError::TornDown));
    }
}
