//! Scripted stand-ins for the platform services, shared by unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use crossbeam::channel::{self, Receiver, Sender};

use crate::clock::{Clock, DeferredTask, TimerQueue};
use crate::detection::{CaptureDevice, Frame, FrameSource, PresenceClassifier};
use crate::error::{DetectionError, WakeLayerError};
use crate::scheduler::WakeLayer;
use crate::sound::{
    AudioError, AudioPlayback, AudioResult, AudioSessionOptions, LoadOptions, PlaybackStatus, SoundHandle,
    StatusObserver,
};
use crate::types::{WakeHandle, WakePayload};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// A fixed test day at `h:m:s`
pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 14)
        .and_then(|d| d.and_hms_opt(h, m, s))
        .expect("valid test time")
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

// ============================================================================
// Clock and timers
// ============================================================================

pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *lock(&self.now) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *lock(&self.now)
    }
}

/// Timer queue that only runs tasks when told to
#[derive(Default)]
pub struct ManualTimers {
    pending: Mutex<Vec<(Duration, DeferredTask)>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays of the tasks not yet run, in scheduling order
    pub fn delays(&self) -> Vec<Duration> {
        lock(&self.pending).iter().map(|(d, _)| *d).collect()
    }

    /// Run every task pending right now. Tasks they schedule stay pending.
    pub fn run_pending(&self) -> usize {
        let tasks: Vec<_> = lock(&self.pending).drain(..).collect();
        let count = tasks.len();
        for (_, task) in tasks {
            task();
        }
        count
    }
}

impl TimerQueue for ManualTimers {
    fn schedule(&self, delay: Duration, task: DeferredTask) {
        lock(&self.pending).push((delay, task));
    }
}

// ============================================================================
// Wake layer
// ============================================================================

#[derive(Default)]
struct WakeRecords {
    armed: Vec<(WakeHandle, NaiveDateTime, WakePayload)>,
    cancelled: Vec<WakeHandle>,
    fail_next: Option<String>,
    next: u64,
}

/// Records every arm and cancel
#[derive(Default)]
pub struct RecordingWakeLayer {
    records: Mutex<WakeRecords>,
}

impl RecordingWakeLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> Vec<(WakeHandle, NaiveDateTime, WakePayload)> {
        lock(&self.records).armed.clone()
    }

    pub fn cancelled(&self) -> Vec<WakeHandle> {
        lock(&self.records).cancelled.clone()
    }

    /// Armed and not cancelled, in arming order
    pub fn outstanding(&self) -> Vec<WakeHandle> {
        let records = lock(&self.records);
        records
            .armed
            .iter()
            .map(|(h, _, _)| h.clone())
            .filter(|h| !records.cancelled.contains(h))
            .collect()
    }

    /// Payload armed under `handle`
    pub fn payload(&self, handle: &WakeHandle) -> Option<WakePayload> {
        lock(&self.records)
            .armed
            .iter()
            .find(|(h, _, _)| h == handle)
            .map(|(_, _, p)| p.clone())
    }

    pub fn fail_next_arm(&self, reason: &str) {
        lock(&self.records).fail_next = Some(reason.to_string());
    }
}

impl WakeLayer for RecordingWakeLayer {
    fn arm(&self, target: NaiveDateTime, payload: WakePayload) -> Result<WakeHandle, WakeLayerError> {
        let mut records = lock(&self.records);
        if let Some(reason) = records.fail_next.take() {
            return Err(WakeLayerError(reason));
        }
        records.next += 1;
        let handle = WakeHandle::new(format!("wake-{}", records.next));
        records.armed.push((handle.clone(), target, payload));
        Ok(handle)
    }

    fn cancel(&self, handle: &WakeHandle) {
        let mut records = lock(&self.records);
        let known = records.armed.iter().any(|(h, _, _)| h == handle);
        if known && !records.cancelled.contains(handle) {
            records.cancelled.push(handle.clone());
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Backend call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioCounts {
    pub load: usize,
    pub play: usize,
    pub stop: usize,
    pub unload: usize,
}

#[derive(Default)]
struct AudioState {
    counts: AudioCounts,
    last_session: Option<AudioSessionOptions>,
    last_load: Option<LoadOptions>,
    loaded: HashSet<u64>,
    observers: HashMap<u64, Arc<dyn Fn(PlaybackStatus) + Send + Sync>>,
    next_handle: u64,
    fail_load: Option<String>,
    fail_play: Option<String>,
    /// (entered, release) for a `play` call that should stall
    play_gate: Option<(Sender<()>, Receiver<()>)>,
}

/// In-memory audio backend; clones share state
#[derive(Clone, Default)]
pub struct ScriptedAudio {
    state: Arc<Mutex<AudioState>>,
}

impl ScriptedAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> AudioCounts {
        lock(&self.state).counts
    }

    pub fn last_session(&self) -> Option<AudioSessionOptions> {
        lock(&self.state).last_session
    }

    pub fn last_load_options(&self) -> Option<LoadOptions> {
        lock(&self.state).last_load
    }

    pub fn loaded_count(&self) -> usize {
        lock(&self.state).loaded.len()
    }

    /// Simulate the platform dropping every resource behind our back
    pub fn drop_all_loaded(&self) {
        let mut state = lock(&self.state);
        state.loaded.clear();
        state.observers.clear();
    }

    pub fn fail_next_load(&self, reason: &str) {
        lock(&self.state).fail_load = Some(reason.to_string());
    }

    pub fn fail_next_play(&self, reason: &str) {
        lock(&self.state).fail_play = Some(reason.to_string());
    }

    /// Make the next `play` stall until released
    ///
    /// Returns a receiver signalled once `play` is stalled and a sender that
    /// lets it continue.
    pub fn hold_next_play(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded(1);
        lock(&self.state).play_gate = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    /// Push a status update to every registered observer
    pub fn emit_status(&self, status: PlaybackStatus) {
        let observers: Vec<_> = lock(&self.state).observers.values().cloned().collect();
        for observer in observers {
            observer(status);
        }
    }
}

impl AudioPlayback for ScriptedAudio {
    fn configure_session(&mut self, options: &AudioSessionOptions) -> AudioResult<()> {
        lock(&self.state).last_session = Some(*options);
        Ok(())
    }

    fn load(&mut self, _source: &str, options: LoadOptions) -> AudioResult<SoundHandle> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.fail_load.take() {
            return Err(AudioError::Load(reason));
        }
        state.counts.load += 1;
        state.next_handle += 1;
        let id = state.next_handle;
        state.loaded.insert(id);
        state.last_load = Some(options);
        Ok(SoundHandle(id))
    }

    fn play(&mut self, handle: SoundHandle) -> AudioResult<()> {
        let gate = lock(&self.state).play_gate.take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }

        let mut state = lock(&self.state);
        if let Some(reason) = state.fail_play.take() {
            return Err(AudioError::Play(reason));
        }
        if !state.loaded.contains(&handle.0) {
            return Err(AudioError::Play(format!("{} not loaded", handle)));
        }
        state.counts.play += 1;
        Ok(())
    }

    fn stop(&mut self, handle: SoundHandle) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if !state.loaded.contains(&handle.0) {
            return Err(AudioError::Stop(format!("{} not loaded", handle)));
        }
        state.counts.stop += 1;
        Ok(())
    }

    fn unload(&mut self, handle: SoundHandle) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if !state.loaded.remove(&handle.0) {
            return Err(AudioError::Unload(format!("{} not loaded", handle)));
        }
        state.observers.remove(&handle.0);
        state.counts.unload += 1;
        Ok(())
    }

    fn is_loaded(&self, handle: SoundHandle) -> bool {
        lock(&self.state).loaded.contains(&handle.0)
    }

    fn set_status_observer(&mut self, handle: SoundHandle, observer: StatusObserver) {
        lock(&self.state).observers.insert(handle.0, Arc::from(observer));
    }
}

// ============================================================================
// Camera and classifier
// ============================================================================

/// Scripted outcome of one capture-and-classify round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Present,
    Absent,
    CaptureError,
    ClassifyError,
}

const FRAME_ABSENT: u8 = 0;
const FRAME_PRESENT: u8 = 1;
const FRAME_UNREADABLE: u8 = 2;

struct CameraState {
    script: Mutex<VecDeque<Sample>>,
    fallback: Mutex<Sample>,
    open: AtomicUsize,
    opened: AtomicUsize,
    failing_opens: AtomicUsize,
    taken: AtomicUsize,
}

/// Camera replaying a script of samples, then a fallback forever
#[derive(Clone)]
pub struct ScriptedCamera {
    state: Arc<CameraState>,
}

impl ScriptedCamera {
    pub fn new(script: Vec<Sample>) -> Self {
        Self {
            state: Arc::new(CameraState {
                script: Mutex::new(script.into()),
                fallback: Mutex::new(Sample::Absent),
                open: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                failing_opens: AtomicUsize::new(0),
                taken: AtomicUsize::new(0),
            }),
        }
    }

    /// Classifier that understands this camera's frames
    pub fn classifier(&self) -> ScriptedClassifier {
        ScriptedClassifier
    }

    pub fn set_fallback(&self, sample: Sample) {
        *lock(&self.state.fallback) = sample;
    }

    /// Make the next `n` opens fail as unavailable
    pub fn fail_opens(&self, n: usize) {
        self.state.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Frame sources currently open
    pub fn open_sources(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Successful opens so far
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn samples_taken(&self) -> usize {
        self.state.taken.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for ScriptedCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, DetectionError> {
        let failed = self
            .state
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DetectionError::DeviceUnavailable("camera busy".into()));
        }

        self.state.open.fetch_add(1, Ordering::SeqCst);
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedSource {
    state: Arc<CameraState>,
}

impl FrameSource for ScriptedSource {
    fn capture(&mut self) -> Result<Frame, DetectionError> {
        self.state.taken.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.state.script).pop_front();
        let sample = next.unwrap_or_else(|| *lock(&self.state.fallback));

        let code = match sample {
            Sample::Present => FRAME_PRESENT,
            Sample::Absent => FRAME_ABSENT,
            Sample::ClassifyError => FRAME_UNREADABLE,
            Sample::CaptureError => return Err(DetectionError::Capture("scripted capture error".into())),
        };
        Ok(Frame {
            data: vec![code],
            width: 1,
            height: 1,
        })
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedClassifier;

impl PresenceClassifier for ScriptedClassifier {
    fn classify(&self, frame: &Frame) -> Result<bool, DetectionError> {
        match frame.data.first() {
            Some(&FRAME_PRESENT) => Ok(true),
            Some(&FRAME_ABSENT) => Ok(false),
            _ => Err(DetectionError::Classify("unreadable frame".into())),
        }
    }
}
