//! Alarm engine - wires the alarm collection to the trigger arbiter
//!
//! The engine is owned by a single thread (the alarm service). Wake
//! deliveries, scans and CRUD calls all arrive there. Deferred re-checks and
//! presence dismissals run on their own threads inside the arbiter and come
//! back as [`SessionEvent`]s, which the owner feeds to
//! [`AlarmEngine::on_session_event`] so the fired alarm gets re-armed.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};

use crate::alarms::AlarmCollection;
use crate::arbiter::{ArbiterPhase, DeliveryOutcome, SessionEvent, TriggerArbiter};
use crate::clock::{Clock, TimerQueue};
use crate::config::RouseConfig;
use crate::detection::{CaptureDevice, PresenceClassifier};
use crate::dismissal::DetectionRig;
use crate::error::{AlarmError, AlarmResult};
use crate::scheduler::{Scheduler, WakeLayer};
use crate::sound::SoundEngine;
use crate::types::{Alarm, AlarmId, DetectionState, DismissMode, RingingSession, TimeOfDay, WakePayload};

/// External services the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub wake_layer: Arc<dyn WakeLayer>,
    pub sound: Arc<SoundEngine>,
    pub capture: Arc<dyn CaptureDevice>,
    pub classifier: Arc<dyn PresenceClassifier>,
    pub clock: Arc<dyn Clock>,
    pub timers: Arc<dyn TimerQueue>,
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub phase: ArbiterPhase,
    pub session: Option<RingingSession>,
    /// Presence evidence while a presence session rings
    pub detection: Option<DetectionState>,
    pub sound_playing: bool,
}

/// What happened to the fired alarm after its session ended
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// Re-armed for its next occurrence
    Rearmed(Alarm),
    /// Switched off (one-shot, or re-arm failed)
    Disarmed(AlarmId),
    /// Nothing to do (no alarm behind the session, or it was deleted)
    None,
}

pub struct AlarmEngine {
    alarms: AlarmCollection,
    arbiter: Arc<TriggerArbiter>,
    sound: Arc<SoundEngine>,
    clock: Arc<dyn Clock>,
    repeat_daily: bool,
    tick_interval: Duration,
    session_rx: Receiver<SessionEvent>,
}

impl AlarmEngine {
    pub fn new(config: &RouseConfig, parts: Collaborators) -> Self {
        let (session_tx, session_rx) = channel::unbounded();

        let scheduler = Arc::new(Scheduler::new(parts.wake_layer));
        let rig = DetectionRig::new(parts.capture, parts.classifier, &config.timing);
        let arbiter = TriggerArbiter::new(
            &config.timing,
            Arc::clone(&parts.sound),
            rig,
            Arc::clone(&parts.clock),
            parts.timers,
            session_tx,
        );

        log::info!(
            "[Engine] Ready (tolerance {:?}, tick {:?}, {} ticks to dismiss, repeat_daily={})",
            config.timing.early_tolerance(),
            config.timing.tick_interval(),
            config.timing.ticks_to_dismiss(),
            config.repeat_daily
        );

        Self {
            alarms: AlarmCollection::new(scheduler),
            arbiter,
            sound: parts.sound,
            clock: parts.clock,
            repeat_daily: config.repeat_daily,
            tick_interval: config.timing.tick_interval(),
            session_rx,
        }
    }

    // ------------------------------------------------------------------------
    // Alarm collection
    // ------------------------------------------------------------------------

    pub fn add_alarm(&mut self, time_of_day: TimeOfDay, label: &str, dismiss_mode: DismissMode) -> AlarmResult<Alarm> {
        let id = self.alarms.add(time_of_day, label, dismiss_mode, self.clock.now())?;
        self.alarm(id)
    }

    /// Returns the alarm after the toggle
    ///
    /// Switching off also withdraws any early delivery still waiting in the
    /// arbiter, so nothing already received can ring a disabled alarm.
    pub fn toggle_alarm(&mut self, id: AlarmId) -> AlarmResult<Alarm> {
        if !self.alarms.toggle(id, self.clock.now())? {
            self.arbiter.cancel_deferred(id);
        }
        self.alarm(id)
    }

    pub fn delete_alarm(&mut self, id: AlarmId) -> AlarmResult<Alarm> {
        let alarm = self.alarms.delete(id)?;
        self.arbiter.cancel_deferred(id);
        Ok(alarm)
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms.list()
    }

    fn alarm(&self, id: AlarmId) -> AlarmResult<Alarm> {
        self.alarms.get(id).cloned().ok_or(AlarmError::UnknownAlarm(id))
    }

    // ------------------------------------------------------------------------
    // Ringing
    // ------------------------------------------------------------------------

    /// Hand a wake-event delivery to the arbiter, stamped with the current time
    pub fn deliver(&self, payload: WakePayload) -> DeliveryOutcome {
        self.arbiter.on_wake_event_delivered(payload, self.clock.now())
    }

    pub fn scan(&self, code: &str) -> bool {
        self.arbiter.on_scan(code)
    }

    /// Emergency stop, ends the session without verification
    pub fn force_stop(&self) -> Option<RingingSession> {
        self.arbiter.stop()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            phase: self.arbiter.phase(),
            session: self.arbiter.session(),
            detection: self.arbiter.detection_state(),
            sound_playing: self.sound.is_playing(),
        }
    }

    /// Presence polling interval, the cadence at which progress can change
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Session lifecycle events, to be fed back through `on_session_event`
    pub fn session_events(&self) -> &Receiver<SessionEvent> {
        &self.session_rx
    }

    /// Re-arm or switch off the alarm behind a finished session
    pub fn on_session_event(&mut self, event: &SessionEvent) -> AlarmResult<FollowUp> {
        let SessionEvent::Ended { session, reason } = event else {
            return Ok(FollowUp::None);
        };
        let Some(id) = session.alarm_id else {
            return Ok(FollowUp::None);
        };
        if self.alarms.get(id).is_none() {
            log::debug!("[Engine] {} was deleted while ringing", id);
            return Ok(FollowUp::None);
        }

        log::info!("[Engine] Session for {} {}, following up", id, reason);

        match self
            .alarms
            .mark_fired(id, session.target_time, self.clock.now(), self.repeat_daily)
        {
            Ok(()) => {
                let alarm = self.alarm(id)?;
                if alarm.active {
                    Ok(FollowUp::Rearmed(alarm))
                } else {
                    self.arbiter.cancel_deferred(id);
                    Ok(FollowUp::Disarmed(id))
                }
            }
            Err(e) => {
                log::error!("[Engine] Failed to re-arm {}: {}", id, e);
                self.arbiter.cancel_deferred(id);
                Err(e)
            }
        }
    }

    /// Stop any ringing session before the owner goes away
    pub fn shutdown(&self) {
        if let Some(session) = self.arbiter.stop() {
            log::info!("[Engine] Stopped {} on shutdown", session.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SoundConfig, TimingConfig};
    use crate::test_support::{at, ManualClock, ManualTimers, RecordingWakeLayer, ScriptedAudio, ScriptedCamera};

    struct Fixture {
        engine: AlarmEngine,
        layer: Arc<RecordingWakeLayer>,
        audio: ScriptedAudio,
        clock: Arc<ManualClock>,
        timers: Arc<ManualTimers>,
    }

    fn fixture(repeat_daily: bool) -> Fixture {
        let layer = Arc::new(RecordingWakeLayer::new());
        let audio = ScriptedAudio::new();
        let camera = ScriptedCamera::new(vec![]);
        let clock = Arc::new(ManualClock::new(at(6, 0, 0)));
        let timers = Arc::new(ManualTimers::new());

        let config = RouseConfig {
            timing: TimingConfig {
                tick_interval_ms: 5,
                ..TimingConfig::default()
            },
            sound: SoundConfig::default(),
            repeat_daily,
        };
        let parts = Collaborators {
            wake_layer: layer.clone(),
            sound: Arc::new(SoundEngine::new(Box::new(audio.clone()), SoundConfig::default())),
            capture: Arc::new(camera.clone()),
            classifier: Arc::new(camera.classifier()),
            clock: clock.clone(),
            timers: timers.clone(),
        };

        Fixture {
            engine: AlarmEngine::new(&config, parts),
            layer,
            audio,
            clock,
            timers,
        }
    }

    fn tod(h: u8, m: u8) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    /// Deliver the alarm's armed payload at its target time
    fn ring(f: &Fixture, alarm: &Alarm) -> RingingSession {
        let payload = f.layer.payload(alarm.wake_handle.as_ref().unwrap()).unwrap();
        f.clock.set(payload.target_time);
        match f.engine.deliver(payload) {
            DeliveryOutcome::Ringing { session, .. } => session,
            other => panic!("expected ringing, got {:?}", other),
        }
    }

    fn ended(f: &Fixture) -> SessionEvent {
        loop {
            match f.engine.session_events().recv_timeout(Duration::from_secs(2)) {
                Ok(event @ SessionEvent::Ended { .. }) => return event,
                Ok(_) => continue,
                Err(e) => panic!("no session end: {}", e),
            }
        }
    }

    #[test]
    fn test_dismissed_alarm_rearms_for_next_day() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(7, 0), "Work", DismissMode::SingleScan).unwrap();
        let session = ring(&f, &alarm);
        assert_eq!(session.alarm_id, Some(alarm.id));
        assert_eq!(f.engine.status().phase, ArbiterPhase::Ringing);
        assert!(f.engine.status().sound_playing);

        assert!(f.engine.scan("ok"));
        let event = ended(&f);

        f.clock.set(at(7, 0, 30));
        match f.engine.on_session_event(&event).unwrap() {
            FollowUp::Rearmed(rearmed) => {
                assert_eq!(rearmed.next_fire, Some(at(7, 0, 0) + chrono::Duration::days(1)));
                assert_eq!(f.layer.outstanding(), vec![rearmed.wake_handle.unwrap()]);
            }
            other => panic!("expected re-arm, got {:?}", other),
        }
        assert!(!f.engine.status().sound_playing);
        assert_eq!(f.audio.loaded_count(), 0);
    }

    #[test]
    fn test_one_shot_alarm_switches_off_after_forced_stop() {
        let mut f = fixture(false);
        let alarm = f.engine.add_alarm(tod(7, 0), "", DismissMode::Presence).unwrap();
        ring(&f, &alarm);

        assert!(f.engine.force_stop().is_some());
        assert!(f.engine.force_stop().is_none());
        let event = ended(&f);

        assert_eq!(f.engine.on_session_event(&event).unwrap(), FollowUp::Disarmed(alarm.id));
        assert!(!f.engine.alarms()[0].active);
        assert!(f.layer.outstanding().is_empty());
        assert!(f.engine.status().detection.is_none());
    }

    #[test]
    fn test_alarm_deleted_while_ringing_needs_no_follow_up() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(7, 0), "Gym", DismissMode::SingleScan).unwrap();
        ring(&f, &alarm);

        f.engine.delete_alarm(alarm.id).unwrap();
        f.engine.scan("code");
        let event = ended(&f);

        assert_eq!(f.engine.on_session_event(&event).unwrap(), FollowUp::None);
        assert!(f.engine.alarms().is_empty());
    }

    #[test]
    fn test_rearm_failure_is_reported_and_alarm_disarmed() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(7, 0), "Work", DismissMode::SingleScan).unwrap();
        ring(&f, &alarm);
        f.engine.scan("code");
        let event = ended(&f);

        f.layer.fail_next_arm("notifications revoked");
        assert!(matches!(
            f.engine.on_session_event(&event),
            Err(AlarmError::SchedulingFailed(_))
        ));
        assert!(!f.engine.alarms()[0].active);
    }

    #[test]
    fn test_toggle_reports_new_state() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(7, 0), "Work", DismissMode::SingleScan).unwrap();

        let off = f.engine.toggle_alarm(alarm.id).unwrap();
        assert!(!off.active);
        let on = f.engine.toggle_alarm(alarm.id).unwrap();
        assert!(on.active);
        assert!(matches!(
            f.engine.toggle_alarm(AlarmId(99)),
            Err(AlarmError::UnknownAlarm(AlarmId(99)))
        ));
    }

    #[test]
    fn test_started_event_needs_no_follow_up() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(7, 0), "Work", DismissMode::SingleScan).unwrap();
        ring(&f, &alarm);

        let started = f.engine.session_events().try_recv().unwrap();
        assert!(matches!(started, SessionEvent::Started { .. }));
        assert_eq!(f.engine.on_session_event(&started).unwrap(), FollowUp::None);
        f.engine.shutdown();
        assert!(f.engine.status().session.is_none());
    }

    #[test]
    fn test_dismissal_inside_early_tolerance_rearms_for_next_day() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(7, 0), "Early", DismissMode::SingleScan).unwrap();
        let payload = f.layer.payload(alarm.wake_handle.as_ref().unwrap()).unwrap();

        // Two seconds early is within tolerance, so it rings right away
        f.clock.set(at(6, 59, 58));
        assert!(matches!(f.engine.deliver(payload), DeliveryOutcome::Ringing { .. }));
        assert!(f.engine.scan("ok"));
        let event = ended(&f);

        f.clock.set(at(6, 59, 59));
        let rearmed = match f.engine.on_session_event(&event).unwrap() {
            FollowUp::Rearmed(alarm) => alarm,
            other => panic!("expected re-arm, got {:?}", other),
        };
        assert_eq!(rearmed.next_fire, Some(at(7, 0, 0) + chrono::Duration::days(1)));

        // Tomorrow's event is a fresh target and rings again
        f.timers.run_pending();
        let next = f.layer.payload(rearmed.wake_handle.as_ref().unwrap()).unwrap();
        f.clock.set(next.target_time);
        assert!(matches!(f.engine.deliver(next), DeliveryOutcome::Ringing { .. }));
    }

    #[test]
    fn test_toggle_off_withdraws_pending_early_delivery() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(8, 30), "Work", DismissMode::SingleScan).unwrap();
        let payload = f.layer.payload(alarm.wake_handle.as_ref().unwrap()).unwrap();

        f.clock.set(at(8, 0, 0));
        assert!(matches!(f.engine.deliver(payload), DeliveryOutcome::Deferred { .. }));
        assert_eq!(f.engine.status().phase, ArbiterPhase::EarlyWait);

        assert!(!f.engine.toggle_alarm(alarm.id).unwrap().active);
        assert_eq!(f.engine.status().phase, ArbiterPhase::Idle);

        f.clock.set(at(8, 30, 0));
        assert_eq!(f.timers.run_pending(), 1);
        assert!(f.engine.status().session.is_none());
        assert_eq!(f.audio.counts().play, 0);
    }

    #[test]
    fn test_delete_withdraws_pending_early_delivery() {
        let mut f = fixture(true);
        let alarm = f.engine.add_alarm(tod(8, 30), "Gym", DismissMode::Presence).unwrap();
        let payload = f.layer.payload(alarm.wake_handle.as_ref().unwrap()).unwrap();

        f.clock.set(at(8, 0, 0));
        assert!(matches!(f.engine.deliver(payload), DeliveryOutcome::Deferred { .. }));
        f.engine.delete_alarm(alarm.id).unwrap();

        f.clock.set(at(8, 30, 0));
        assert_eq!(f.timers.run_pending(), 1);
        assert_eq!(f.engine.status().phase, ArbiterPhase::Idle);
        assert_eq!(f.audio.counts().play, 0);
    }
}
