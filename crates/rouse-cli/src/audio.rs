//! Audio backends for the headless runner
//!
//! Without the `cpal-output` feature the alarm sound is only logged. With it,
//! a synthesized beeping tone is played on the default output device; the
//! configured sound source is not decoded.

use std::collections::HashSet;

use rouse_core::sound::{
    AudioError, AudioPlayback, AudioResult, AudioSessionOptions, LoadOptions, SoundHandle, StatusObserver,
};

/// Pick the backend for this build
pub fn default_backend() -> Box<dyn AudioPlayback> {
    #[cfg(feature = "cpal-output")]
    {
        Box::new(tone::ToneAudio::new())
    }
    #[cfg(not(feature = "cpal-output"))]
    {
        Box::new(LoggingAudio::default())
    }
}

/// Backend that tracks loaded handles and logs every call
#[derive(Debug, Default)]
pub struct LoggingAudio {
    loaded: HashSet<u64>,
    next_handle: u64,
}

impl AudioPlayback for LoggingAudio {
    fn configure_session(&mut self, options: &AudioSessionOptions) -> AudioResult<()> {
        log::debug!("[Audio] Session configured: {:?}", options);
        Ok(())
    }

    fn load(&mut self, source: &str, options: LoadOptions) -> AudioResult<SoundHandle> {
        self.next_handle += 1;
        self.loaded.insert(self.next_handle);
        log::info!(
            "[Audio] Loaded {} (loop={}, volume={:.2})",
            source,
            options.looping,
            options.volume
        );
        Ok(SoundHandle(self.next_handle))
    }

    fn play(&mut self, handle: SoundHandle) -> AudioResult<()> {
        if !self.loaded.contains(&handle.0) {
            return Err(AudioError::Play(format!("{} not loaded", handle)));
        }
        println!("🔔 BEEP BEEP BEEP ({})", handle);
        Ok(())
    }

    fn stop(&mut self, handle: SoundHandle) -> AudioResult<()> {
        log::info!("[Audio] Stopped {}", handle);
        Ok(())
    }

    fn unload(&mut self, handle: SoundHandle) -> AudioResult<()> {
        self.loaded.remove(&handle.0);
        log::debug!("[Audio] Unloaded {}", handle);
        Ok(())
    }

    fn is_loaded(&self, handle: SoundHandle) -> bool {
        self.loaded.contains(&handle.0)
    }

    fn set_status_observer(&mut self, _handle: SoundHandle, _observer: StatusObserver) {
        // Logged sounds never finish on their own
    }
}

#[cfg(feature = "cpal-output")]
mod tone {
    //! Beeping sine tone through cpal
    //!
    //! cpal streams are not `Send` on every platform, so the stream lives on
    //! its own thread and is driven through a command channel.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam::channel::{self, Sender};

    use rouse_core::sound::{
        AudioError, AudioPlayback, AudioResult, AudioSessionOptions, LoadOptions, SoundHandle, StatusObserver,
    };

    const TONE_HZ: f32 = 880.0;
    /// Beep on/off period in seconds
    const BEEP_PERIOD: f32 = 0.5;

    enum ToneCommand {
        Start,
        Pause,
    }

    pub struct ToneAudio {
        commands: Option<Sender<ToneCommand>>,
        /// f32 bits, read by the audio callback
        gain: Arc<AtomicU32>,
        loaded: HashSet<u64>,
        next_handle: u64,
    }

    impl ToneAudio {
        pub fn new() -> Self {
            Self {
                commands: None,
                gain: Arc::new(AtomicU32::new(0f32.to_bits())),
                loaded: HashSet::new(),
                next_handle: 0,
            }
        }

        fn send(&self, cmd: ToneCommand) -> AudioResult<()> {
            let commands = self.commands.as_ref().ok_or_else(|| AudioError::Session("output not started".into()))?;
            commands
                .send(cmd)
                .map_err(|_| AudioError::Device("tone thread exited".into()))
        }
    }

    /// Build the stream on the tone thread and serve commands until the
    /// backend is dropped
    fn spawn_tone_thread(gain: Arc<AtomicU32>) -> AudioResult<Sender<ToneCommand>> {
        let (cmd_tx, cmd_rx) = channel::unbounded::<ToneCommand>();
        let (ready_tx, ready_rx) = channel::bounded::<Result<(), String>>(1);

        thread::Builder::new()
            .name("alarm-tone".into())
            .spawn(move || {
                let stream = match build_stream(gain) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for cmd in cmd_rx.iter() {
                    let result = match cmd {
                        ToneCommand::Start => stream.play().map_err(|e| e.to_string()),
                        ToneCommand::Pause => stream.pause().map_err(|e| e.to_string()),
                    };
                    if let Err(e) = result {
                        log::error!("[Tone] Stream control failed: {}", e);
                    }
                }
                log::debug!("[Tone] Output thread exiting");
            })
            .map_err(|e| AudioError::Device(format!("failed to spawn tone thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(cmd_tx),
            Ok(Err(e)) => Err(AudioError::Device(e)),
            Err(_) => Err(AudioError::Device("tone thread exited during setup".into())),
        }
    }

    fn build_stream(gain: Arc<AtomicU32>) -> Result<cpal::Stream, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string())?;
        let supported = device.default_output_config().map_err(|e| e.to_string())?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(format!("unsupported sample format {:?}", supported.sample_format()));
        }

        let config: cpal::StreamConfig = supported.config();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0 as f32;
        log::info!("[Tone] Output: {} channels, {}Hz", channels, sample_rate);

        let mut t = 0.0f32;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let volume = f32::from_bits(gain.load(Ordering::Relaxed));
                    for frame in data.chunks_mut(channels) {
                        let gate = if (t / BEEP_PERIOD) as u32 % 2 == 0 { 1.0 } else { 0.0 };
                        let sample = (t * TONE_HZ * std::f32::consts::TAU).sin() * volume * gate * 0.5;
                        for ch in frame.iter_mut() {
                            *ch = sample;
                        }
                        t = (t + 1.0 / sample_rate) % (BEEP_PERIOD * 2.0);
                    }
                },
                move |err| {
                    log::error!("[Tone] Stream error: {}", err);
                },
                None,
            )
            .map_err(|e| e.to_string())?;

        stream.pause().map_err(|e| e.to_string())?;
        Ok(stream)
    }

    impl AudioPlayback for ToneAudio {
        fn configure_session(&mut self, options: &AudioSessionOptions) -> AudioResult<()> {
            if self.commands.is_none() {
                log::info!("[Tone] Opening output ({:?})", options);
                self.commands = Some(spawn_tone_thread(Arc::clone(&self.gain))?);
            }
            Ok(())
        }

        fn load(&mut self, source: &str, options: LoadOptions) -> AudioResult<SoundHandle> {
            log::info!("[Tone] Using synthesized tone in place of {}", source);
            self.gain.store(options.volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
            self.next_handle += 1;
            self.loaded.insert(self.next_handle);
            Ok(SoundHandle(self.next_handle))
        }

        fn play(&mut self, handle: SoundHandle) -> AudioResult<()> {
            if !self.loaded.contains(&handle.0) {
                return Err(AudioError::Play(format!("{} not loaded", handle)));
            }
            self.send(ToneCommand::Start)
        }

        fn stop(&mut self, _handle: SoundHandle) -> AudioResult<()> {
            self.send(ToneCommand::Pause)
        }

        fn unload(&mut self, handle: SoundHandle) -> AudioResult<()> {
            self.loaded.remove(&handle.0);
            Ok(())
        }

        fn is_loaded(&self, handle: SoundHandle) -> bool {
            self.loaded.contains(&handle.0)
        }

        fn set_status_observer(&mut self, _handle: SoundHandle, _observer: StatusObserver) {
            // The tone loops until paused
        }
    }
}
