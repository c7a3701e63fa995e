//! Trigger arbiter - turns unreliable wake deliveries into one ringing session
//!
//! The wake-event layer may deliver the same logical event several times, on
//! several channels, and sometimes well before its target time. The arbiter
//! makes sure that produces exactly one ringing session:
//!
//! ```text
//!          early delivery              deferred re-check
//!  Idle ──────────────────► EarlyWait ───────────────────┐
//!   ▲                                                    ▼
//!   │   stop / dismissal          play()        on-time delivery
//!   └──────────────────── Ringing ◄────── Acquiring ◄──── Idle
//! ```
//!
//! - **Early suppression**: a delivery more than the tolerance ahead of its
//!   target is deferred to a local timer. Repeat early deliveries for the same
//!   target are dropped while that timer is pending. Switching the alarm off
//!   withdraws its pending deferrals ([`TriggerArbiter::cancel_deferred`]).
//! - **Single flight**: an on-time delivery proceeds only if no session exists
//!   and no other acquisition holds the guard. The guard is released a short
//!   delay after the session starts to absorb trailing duplicates, and
//!   auto-expires if an acquisition gets stuck.
//! - **Served targets**: a target that already produced a session is never
//!   served again, so a duplicate arriving after dismissal stays silent.
//!
//! Session lifecycle changes are published as [`SessionEvent`]s.

mod lock;

pub use lock::{FlightTicket, SingleFlight};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::NaiveDateTime;
use crossbeam::channel::Sender;

use crate::clock::{non_negative, Clock, TimerQueue};
use crate::config::TimingConfig;
use crate::dismissal::{DetectionRig, DismissalVerifier};
use crate::sound::{AudioError, SoundEngine};
use crate::types::{AlarmId, DetectionState, RingingSession, SessionEnd, SessionId, WakePayload};

/// How many served targets are remembered for duplicate suppression
const SERVED_HISTORY: usize = 16;

/// Observable arbiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterPhase {
    Idle,
    /// No session, at least one early delivery is waiting on its timer
    EarlyWait,
    /// An acquisition holds the single-flight guard, no session yet
    Acquiring,
    Ringing,
}

/// Why a delivery was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Early delivery for a target that is already deferred
    AlreadyDeferred,
    /// A ringing session already exists
    SessionActive,
    /// Another delivery holds the single-flight guard
    AcquisitionInFlight,
    /// This target already produced a session
    AlreadyServed,
    /// The guard timed out and was taken over while this acquisition ran
    Superseded,
}

/// Result of handing one delivery to the arbiter
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Too early; re-evaluated after `delay`
    Deferred { delay: Duration },
    Dropped(DropReason),
    /// A session started. Audio failure leaves the session running silently.
    Ringing {
        session: RingingSession,
        playback_error: Option<AudioError>,
    },
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        session: RingingSession,
        playback_error: Option<AudioError>,
    },
    Ended {
        session: RingingSession,
        reason: SessionEnd,
    },
}

struct ActiveSession {
    session: RingingSession,
    verifier: Arc<DismissalVerifier>,
}

/// A pending early-wait timer. A timer whose generation no longer matches
/// was withdrawn and does nothing when it fires.
struct Deferral {
    alarm_id: Option<AlarmId>,
    generation: u64,
}

struct ArbiterInner {
    flight: SingleFlight,
    session: Option<ActiveSession>,
    /// Acquisitions between taking the guard and settling
    acquiring: usize,
    /// Targets with a pending early-wait timer
    deferred: HashMap<NaiveDateTime, Deferral>,
    next_deferral: u64,
    /// Most recent targets that started a session
    served: VecDeque<NaiveDateTime>,
    next_session: u64,
}

pub struct TriggerArbiter {
    me: Weak<TriggerArbiter>,
    inner: Mutex<ArbiterInner>,
    sound: Arc<SoundEngine>,
    rig: DetectionRig,
    clock: Arc<dyn Clock>,
    timers: Arc<dyn TimerQueue>,
    events: Sender<SessionEvent>,
    early_tolerance: chrono::Duration,
    release_delay: Duration,
}

impl TriggerArbiter {
    pub fn new(
        timing: &TimingConfig,
        sound: Arc<SoundEngine>,
        rig: DetectionRig,
        clock: Arc<dyn Clock>,
        timers: Arc<dyn TimerQueue>,
        events: Sender<SessionEvent>,
    ) -> Arc<Self> {
        let lock_timeout = wall_duration(timing.lock_timeout());
        let early_tolerance = wall_duration(timing.early_tolerance());

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            inner: Mutex::new(ArbiterInner {
                flight: SingleFlight::new(lock_timeout),
                session: None,
                acquiring: 0,
                deferred: HashMap::new(),
                next_deferral: 1,
                served: VecDeque::with_capacity(SERVED_HISTORY),
                next_session: 1,
            }),
            sound,
            rig,
            clock,
            timers,
            events,
            early_tolerance,
            release_delay: timing.release_delay(),
        })
    }

    /// Handle one wake-event delivery
    ///
    /// Safe to call repeatedly and from several delivery channels.
    pub fn on_wake_event_delivered(&self, payload: WakePayload, now: NaiveDateTime) -> DeliveryOutcome {
        let diff = payload.target_time - now;
        if diff > self.early_tolerance {
            return self.defer(payload, diff);
        }
        self.acquire(payload, now)
    }

    /// End the current session without verification
    ///
    /// No-op (returns `None`) when nothing is ringing.
    pub fn stop(&self) -> Option<RingingSession> {
        self.end_session(None, SessionEnd::Forced)
    }

    /// Withdraw pending early-wait timers for an alarm that was switched off
    /// or deleted, returning how many were withdrawn
    pub fn cancel_deferred(&self, alarm_id: AlarmId) -> usize {
        let mut inner = self.lock();
        let before = inner.deferred.len();
        inner.deferred.retain(|_, d| d.alarm_id != Some(alarm_id));
        let withdrawn = before - inner.deferred.len();
        if withdrawn > 0 {
            log::info!("[Arbiter] Withdrew {} deferred wake(s) for {}", withdrawn, alarm_id);
        }
        withdrawn
    }

    /// Feed a scanned code to the active session's verifier
    pub fn on_scan(&self, code: &str) -> bool {
        let verifier = self.lock().session.as_ref().map(|a| Arc::clone(&a.verifier));
        match verifier {
            Some(verifier) => verifier.on_scan(code),
            None => {
                log::debug!("[Arbiter] Scan with no ringing session, ignored");
                false
            }
        }
    }

    pub fn phase(&self) -> ArbiterPhase {
        let now = self.clock.now();
        let inner = self.lock();
        if inner.session.is_some() {
            ArbiterPhase::Ringing
        } else if inner.flight.is_held(now) {
            ArbiterPhase::Acquiring
        } else if !inner.deferred.is_empty() {
            ArbiterPhase::EarlyWait
        } else {
            ArbiterPhase::Idle
        }
    }

    pub fn session(&self) -> Option<RingingSession> {
        self.lock().session.as_ref().map(|a| a.session.clone())
    }

    /// Presence evidence of the active session, if it is a presence session
    pub fn detection_state(&self) -> Option<DetectionState> {
        self.lock().session.as_ref().and_then(|a| a.verifier.detection_state())
    }

    // ------------------------------------------------------------------------
    // Early suppression
    // ------------------------------------------------------------------------

    fn defer(&self, payload: WakePayload, diff: chrono::Duration) -> DeliveryOutcome {
        let target = payload.target_time;
        let generation = {
            let mut inner = self.lock();
            if inner.deferred.contains_key(&target) {
                log::info!("[Arbiter] Early delivery for {} already deferred, dropping", target);
                return DeliveryOutcome::Dropped(DropReason::AlreadyDeferred);
            }
            let generation = inner.next_deferral;
            inner.next_deferral += 1;
            inner.deferred.insert(
                target,
                Deferral {
                    alarm_id: payload.alarm_id,
                    generation,
                },
            );
            generation
        };

        let delay = non_negative(diff);
        log::info!("[Arbiter] Early delivery for {}, re-checking in {:?}", target, delay);

        let me = self.me.clone();
        self.timers.schedule(
            delay,
            Box::new(move || {
                if let Some(arbiter) = me.upgrade() {
                    arbiter.on_deferred_fire(payload, generation);
                }
            }),
        );
        DeliveryOutcome::Deferred { delay }
    }

    fn on_deferred_fire(&self, payload: WakePayload, generation: u64) {
        {
            let mut inner = self.lock();
            let live = inner
                .deferred
                .get(&payload.target_time)
                .map_or(false, |d| d.generation == generation);
            if !live {
                log::info!("[Arbiter] Deferred wake for {} was withdrawn", payload.target_time);
                return;
            }
            inner.deferred.remove(&payload.target_time);
        }
        let now = self.clock.now();
        log::debug!("[Arbiter] Deferred check for {} at {}", payload.target_time, now);
        let outcome = self.on_wake_event_delivered(payload, now);
        log::debug!("[Arbiter] Deferred check outcome: {:?}", outcome);
    }

    // ------------------------------------------------------------------------
    // Single-flight acquisition
    // ------------------------------------------------------------------------

    fn acquire(&self, payload: WakePayload, now: NaiveDateTime) -> DeliveryOutcome {
        let ticket = {
            let mut inner = self.lock();
            if let Some(active) = &inner.session {
                log::info!(
                    "[Arbiter] Delivery for {} dropped, {} already ringing",
                    payload.target_time,
                    active.session.id
                );
                return DeliveryOutcome::Dropped(DropReason::SessionActive);
            }
            if inner.served.contains(&payload.target_time) {
                log::info!("[Arbiter] Delivery for {} already served, dropping", payload.target_time);
                return DeliveryOutcome::Dropped(DropReason::AlreadyServed);
            }
            match inner.flight.try_acquire(now) {
                Some(ticket) => {
                    inner.acquiring += 1;
                    ticket
                }
                None => {
                    log::info!(
                        "[Arbiter] Delivery for {} dropped, acquisition in flight",
                        payload.target_time
                    );
                    return DeliveryOutcome::Dropped(DropReason::AcquisitionInFlight);
                }
            }
        };

        log::info!("[Arbiter] Acquired for '{}' ({})", payload.label, payload.target_time);

        // Audio setup runs without the state lock; the guard keeps others out
        let playback_error = match self.sound.play() {
            Ok(()) => None,
            Err(e) => {
                log::error!("[Arbiter] Playback failed, ringing silently: {}", e);
                Some(e)
            }
        };

        let session = {
            let mut inner = self.lock();
            inner.acquiring -= 1;
            if !inner.flight.owns(ticket) || inner.session.is_some() {
                log::warn!("[Arbiter] Acquisition for {} superseded, abandoning", payload.target_time);
                // Sound started here belongs to no session unless a live one
                // or a pending acquisition can claim it. Holding the lock keeps
                // new acquisitions from starting playback meanwhile.
                if playback_error.is_none() && inner.session.is_none() && inner.acquiring == 0 {
                    self.sound.stop();
                }
                return DeliveryOutcome::Dropped(DropReason::Superseded);
            }

            let id = SessionId(inner.next_session);
            inner.next_session += 1;
            let session = RingingSession {
                id,
                label: payload.label.clone(),
                dismiss_mode: payload.dismiss_mode,
                started_at: now,
                target_time: payload.target_time,
                alarm_id: payload.alarm_id,
            };

            let me = self.me.clone();
            let verifier = DismissalVerifier::start(
                session.dismiss_mode,
                &self.rig,
                Box::new(move || {
                    if let Some(arbiter) = me.upgrade() {
                        arbiter.end_session(Some(id), SessionEnd::Dismissed);
                    }
                }),
            );

            if inner.served.len() == SERVED_HISTORY {
                inner.served.pop_front();
            }
            inner.served.push_back(payload.target_time);
            inner.session = Some(ActiveSession {
                session: session.clone(),
                verifier: Arc::new(verifier),
            });
            session
        };

        log::info!(
            "[Arbiter] {} ringing for '{}' ({} mode)",
            session.id,
            session.label,
            session.dismiss_mode
        );
        self.schedule_release(ticket);
        self.publish(SessionEvent::Started {
            session: session.clone(),
            playback_error: playback_error.clone(),
        });

        DeliveryOutcome::Ringing { session, playback_error }
    }

    fn schedule_release(&self, ticket: FlightTicket) {
        let me = self.me.clone();
        self.timers.schedule(
            self.release_delay,
            Box::new(move || {
                if let Some(arbiter) = me.upgrade() {
                    if arbiter.lock().flight.release(ticket) {
                        log::debug!("[Arbiter] Single-flight guard released");
                    }
                }
            }),
        );
    }

    // ------------------------------------------------------------------------
    // Session teardown
    // ------------------------------------------------------------------------

    /// End the session if it matches `expected` (any session when `None`)
    fn end_session(&self, expected: Option<SessionId>, reason: SessionEnd) -> Option<RingingSession> {
        let active = {
            let mut inner = self.lock();
            match &inner.session {
                Some(active) if expected.map_or(true, |id| id == active.session.id) => inner.session.take(),
                _ => None,
            }
        };

        let Some(active) = active else {
            log::debug!("[Arbiter] No matching session to end ({}), ignoring", reason);
            return None;
        };

        active.verifier.cancel();
        self.sound.stop();

        log::info!("[Arbiter] {} ended ({})", active.session.id, reason);
        self.publish(SessionEvent::Ended {
            session: active.session.clone(),
            reason,
        });
        Some(active.session)
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::warn!("[Arbiter] Failed to publish session event: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Convert a configured duration for comparison against wall-clock times
fn wall_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(1))
}
