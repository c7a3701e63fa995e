//! Scheduler - turns a daily time of day into an armed wake event
//!
//! The scheduler never stores absolute fire times of its own. Every arm
//! recomputes the next occurrence from the alarm's time of day, so an alarm
//! that was switched off and on again always lands on its next occurrence
//! rather than a date frozen at creation.

use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};

use crate::error::{AlarmResult, WakeLayerError};
use crate::types::{Alarm, AlarmId, DismissMode, TimeOfDay, WakeHandle, WakePayload};

/// External wake-event (notification) layer
///
/// Deliveries happen out of band: the layer hands the payload back to
/// whoever registered for it, zero or more times, possibly early.
pub trait WakeLayer: Send + Sync {
    /// Arm a wake event at `target`
    fn arm(&self, target: NaiveDateTime, payload: WakePayload) -> Result<WakeHandle, WakeLayerError>;

    /// Cancel an armed event. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: &WakeHandle);
}

/// A successfully armed wake event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedWake {
    pub target_time: NaiveDateTime,
    pub handle: WakeHandle,
}

/// Next occurrence of `time_of_day` strictly after `now`
///
/// A candidate equal to `now` counts as already passed, so the result is
/// always in the future and at most 24 hours away.
pub fn compute_target(time_of_day: TimeOfDay, now: NaiveDateTime) -> NaiveDateTime {
    let candidate = now.date().and_time(naive_time(time_of_day));
    if candidate <= now {
        candidate + chrono::Duration::days(1)
    } else {
        candidate
    }
}

fn naive_time(time_of_day: TimeOfDay) -> NaiveTime {
    let seconds = u32::from(time_of_day.hour()) * 3600 + u32::from(time_of_day.minute()) * 60;
    // TimeOfDay is range-checked on construction, the fallback is unreachable
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or_default()
}

/// Owns the wake-event layer and the fire-time policy
pub struct Scheduler {
    layer: Arc<dyn WakeLayer>,
}

impl Scheduler {
    pub fn new(layer: Arc<dyn WakeLayer>) -> Self {
        Self { layer }
    }

    /// Arm the next occurrence of `time_of_day`
    ///
    /// Fails with `SchedulingFailed` if the layer refuses; the caller must
    /// then treat the alarm as unarmed.
    pub fn arm(
        &self,
        time_of_day: TimeOfDay,
        label: &str,
        dismiss_mode: DismissMode,
        alarm_id: Option<AlarmId>,
        now: NaiveDateTime,
    ) -> AlarmResult<ArmedWake> {
        let target_time = compute_target(time_of_day, now);
        let payload = WakePayload {
            target_time,
            label: label.to_string(),
            dismiss_mode,
            alarm_id,
        };

        match self.layer.arm(target_time, payload) {
            Ok(handle) => {
                log::info!(
                    "[Scheduler] Armed '{}' for {} ({}, handle {})",
                    label,
                    target_time,
                    dismiss_mode,
                    handle
                );
                Ok(ArmedWake { target_time, handle })
            }
            Err(e) => {
                log::error!("[Scheduler] Failed to arm '{}' for {}: {}", label, target_time, e);
                Err(e.into())
            }
        }
    }

    /// Best-effort cancellation, never fails
    pub fn cancel(&self, handle: &WakeHandle) {
        log::info!("[Scheduler] Cancelling wake event {}", handle);
        self.layer.cancel(handle);
    }

    /// Re-arm an alarm from its stored time of day
    ///
    /// Any handle the alarm still holds is cancelled first so the alarm never
    /// has two outstanding events.
    pub fn rearm(&self, alarm: &Alarm, now: NaiveDateTime) -> AlarmResult<ArmedWake> {
        if let Some(handle) = &alarm.wake_handle {
            self.cancel(handle);
        }
        self.arm(alarm.time_of_day, &alarm.label, alarm.dismiss_mode, Some(alarm.id), now)
    }
}
