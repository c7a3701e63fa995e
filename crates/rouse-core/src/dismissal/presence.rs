//! Presence verification
//!
//! A polling thread samples the camera once per tick. Progress climbs by a
//! fixed step per tick while presence holds and drops straight back to zero
//! when it is lost. Reaching 100 dismisses the session.
//!
//! The thread owns the [`CaptureLease`] for the whole session. Samples run
//! sequentially on that one thread and the ticker coalesces missed ticks, so
//! captures never overlap.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::detection::CaptureLease;
use crate::error::DetectionError;
use crate::types::{DetectionState, PROGRESS_COMPLETE};

use super::{DetectionRig, DismissLatch};

/// What one tick did to the evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Presence held, progress is now the given value
    Progress(u8),
    /// Presence lost, progress back to zero
    Reset,
    /// Sample failed, state unchanged
    Skipped,
    /// Progress reached 100 on this tick
    Dismissed,
    /// Already dismissed earlier, sample ignored
    Finished,
}

/// Evidence accumulator, one per presence session
#[derive(Debug)]
pub struct PresenceTracker {
    step: u8,
    state: DetectionState,
    dismissed: bool,
}

impl PresenceTracker {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.clamp(1, PROGRESS_COMPLETE),
            state: DetectionState::default(),
            dismissed: false,
        }
    }

    /// Apply one sample
    pub fn observe(&mut self, sample: Result<bool, DetectionError>) -> TickOutcome {
        if self.dismissed {
            return TickOutcome::Finished;
        }

        match sample {
            Err(e) => {
                log::debug!("[Presence] Sample failed, skipping tick: {}", e);
                TickOutcome::Skipped
            }
            Ok(false) => {
                if self.state.presence_observed {
                    log::info!("[Presence] Presence lost at {}%, resetting", self.state.progress);
                }
                self.state = DetectionState::default();
                TickOutcome::Reset
            }
            Ok(true) => {
                if !self.state.presence_observed {
                    log::info!("[Presence] Presence detected, accumulating");
                    self.state.presence_observed = true;
                }
                let next = self.state.progress.saturating_add(self.step);
                self.state.progress = next.min(PROGRESS_COMPLETE);
                if next >= PROGRESS_COMPLETE {
                    self.dismissed = true;
                    TickOutcome::Dismissed
                } else {
                    TickOutcome::Progress(self.state.progress)
                }
            }
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }
}

/// Running presence verifier
pub struct PresenceVerifier {
    latch: Arc<DismissLatch>,
    state: Arc<Mutex<DetectionState>>,
    cancel_tx: Sender<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceVerifier {
    /// Spawn the polling loop
    pub fn start(rig: DetectionRig, latch: Arc<DismissLatch>) -> Self {
        let (cancel_tx, cancel_rx) = channel::bounded(1);
        let state = Arc::new(Mutex::new(DetectionState::default()));

        let loop_latch = Arc::clone(&latch);
        let loop_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("presence-verifier".into())
            .spawn(move || run(rig, cancel_rx, loop_latch, loop_state));

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Without a loop only a forced stop can end the session
                log::error!("[Presence] Failed to spawn polling thread: {}", e);
                None
            }
        };

        Self {
            latch,
            state,
            cancel_tx,
            thread: Mutex::new(thread),
        }
    }

    /// Cancel the loop and wait for it to release the camera
    ///
    /// Safe to call repeatedly and from the loop's own dismissal callback
    /// (the loop is not joined from inside itself; it exits right after).
    pub fn cancel(&self) {
        self.latch.cancel();
        let _ = self.cancel_tx.try_send(());

        let handle = self.thread.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[Presence] Polling thread panicked");
            }
        }
    }

    pub fn is_dismissed(&self) -> bool {
        self.latch.is_dismissed()
    }

    pub fn detection_state(&self) -> DetectionState {
        *lock(&self.state)
    }
}

impl Drop for PresenceVerifier {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock(state: &Mutex<DetectionState>) -> MutexGuard<'_, DetectionState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

/// Polling loop body
fn run(rig: DetectionRig, cancel_rx: Receiver<()>, latch: Arc<DismissLatch>, state: Arc<Mutex<DetectionState>>) {
    log::info!(
        "[Presence] Polling every {:?}, +{} per tick",
        rig.tick_interval,
        rig.progress_step
    );

    let ticker = channel::tick(rig.tick_interval);
    let mut tracker = PresenceTracker::new(rig.progress_step);
    let mut lease: Option<CaptureLease> = None;

    loop {
        crossbeam::select! {
            recv(cancel_rx) -> _ => {
                log::info!("[Presence] Cancelled");
                break;
            }
            recv(ticker) -> _ => {
                if latch.is_settled() {
                    break;
                }

                if lease.is_none() {
                    match CaptureLease::acquire(rig.device.as_ref()) {
                        Ok(acquired) => lease = Some(acquired),
                        Err(e) => {
                            log::warn!("[Presence] Camera unavailable, retrying next tick: {}", e);
                            continue;
                        }
                    }
                }

                let sample = match lease.as_mut() {
                    Some(lease) => lease.probe(rig.classifier.as_ref()).sample(),
                    None => continue,
                };

                let outcome = tracker.observe(sample);
                *lock(&state) = tracker.state();

                if outcome == TickOutcome::Dismissed {
                    // Camera goes back before the session is torn down
                    drop(lease.take());
                    if latch.fire() {
                        log::info!("[Presence] Presence sustained, dismissing");
                    }
                    break;
                }
            }
        }
    }

    drop(lease);
    log::debug!("[Presence] Polling loop exited");
}
