//! Alarm collection
//!
//! In-memory list of alarms. Every mutation goes through add/toggle/delete
//! (and `mark_fired` once an alarm's session ends) so that each active alarm
//! holds exactly one outstanding wake handle and inactive alarms hold none.
//! Alarms are not persisted across restarts.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::error::{AlarmError, AlarmResult};
use crate::scheduler::Scheduler;
use crate::types::{Alarm, AlarmId, DismissMode, TimeOfDay};

/// Label used when the user leaves it blank
pub const DEFAULT_LABEL: &str = "Alarm";

pub struct AlarmCollection {
    scheduler: Arc<Scheduler>,
    alarms: Vec<Alarm>,
    next_id: u64,
}

impl AlarmCollection {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            alarms: Vec::new(),
            next_id: 1,
        }
    }

    /// Create an active alarm and arm its first wake event
    ///
    /// If arming fails the alarm is not added and `SchedulingFailed` is
    /// returned, so a failure is never silent.
    pub fn add(
        &mut self,
        time_of_day: TimeOfDay,
        label: &str,
        dismiss_mode: DismissMode,
        now: NaiveDateTime,
    ) -> AlarmResult<AlarmId> {
        let label = match label.trim() {
            "" => DEFAULT_LABEL.to_string(),
            trimmed => trimmed.to_string(),
        };
        let id = AlarmId(self.next_id);

        let armed = self.scheduler.arm(time_of_day, &label, dismiss_mode, Some(id), now)?;
        self.next_id += 1;

        self.alarms.push(Alarm {
            id,
            time_of_day,
            label,
            active: true,
            dismiss_mode,
            wake_handle: Some(armed.handle),
            next_fire: Some(armed.target_time),
        });

        log::info!("[Alarms] Added {} at {}", id, time_of_day);
        Ok(id)
    }

    /// Flip an alarm on or off, returning the new active state
    ///
    /// Off cancels and clears the wake handle. On arms exactly one new
    /// handle from the stored time of day; if that fails the alarm stays off.
    pub fn toggle(&mut self, id: AlarmId, now: NaiveDateTime) -> AlarmResult<bool> {
        let scheduler = Arc::clone(&self.scheduler);
        let alarm = self.get_mut(id)?;

        if alarm.active {
            if let Some(handle) = alarm.wake_handle.take() {
                scheduler.cancel(&handle);
            }
            alarm.next_fire = None;
            alarm.active = false;
            log::info!("[Alarms] {} switched off", id);
            return Ok(false);
        }

        let armed = scheduler.rearm(alarm, now)?;
        alarm.wake_handle = Some(armed.handle);
        alarm.next_fire = Some(armed.target_time);
        alarm.active = true;
        log::info!("[Alarms] {} switched on, next fire {}", id, armed.target_time);
        Ok(true)
    }

    /// Remove an alarm, cancelling its outstanding wake event
    pub fn delete(&mut self, id: AlarmId) -> AlarmResult<Alarm> {
        let index = self
            .alarms
            .iter()
            .position(|a| a.id == id)
            .ok_or(AlarmError::UnknownAlarm(id))?;

        let alarm = self.alarms.remove(index);
        if let Some(handle) = &alarm.wake_handle {
            self.scheduler.cancel(handle);
        }
        log::info!("[Alarms] Deleted {}", id);
        Ok(alarm)
    }

    /// Record that an alarm's wake event for `fired_target` has fired and
    /// its session ended
    ///
    /// With `repeat_daily` the alarm is re-armed for the first occurrence
    /// after both `now` and `fired_target`, otherwise it is switched off.
    /// Sessions may start and end inside the early tolerance, before the
    /// target itself. Inactive alarms are left untouched.
    pub fn mark_fired(
        &mut self,
        id: AlarmId,
        fired_target: NaiveDateTime,
        now: NaiveDateTime,
        repeat_daily: bool,
    ) -> AlarmResult<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let alarm = self.get_mut(id)?;

        if !alarm.active {
            return Ok(());
        }

        if !repeat_daily {
            // The fired handle is spent, cancelling it is a harmless no-op
            if let Some(handle) = alarm.wake_handle.take() {
                scheduler.cancel(&handle);
            }
            alarm.next_fire = None;
            alarm.active = false;
            log::info!("[Alarms] {} fired and switched off", id);
            return Ok(());
        }

        match scheduler.rearm(alarm, now.max(fired_target)) {
            Ok(armed) => {
                alarm.wake_handle = Some(armed.handle);
                alarm.next_fire = Some(armed.target_time);
                log::info!("[Alarms] {} re-armed for {}", id, armed.target_time);
                Ok(())
            }
            Err(e) => {
                alarm.wake_handle = None;
                alarm.next_fire = None;
                alarm.active = false;
                Err(e)
            }
        }
    }

    pub fn get(&self, id: AlarmId) -> Option<&Alarm> {
        self.alarms.iter().find(|a| a.id == id)
    }

    /// All alarms ordered by time of day
    pub fn list(&self) -> Vec<Alarm> {
        let mut alarms = self.alarms.clone();
        alarms.sort_by_key(|a| (a.time_of_day, a.id));
        alarms
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    fn get_mut(&mut self, id: AlarmId) -> AlarmResult<&mut Alarm> {
        self.alarms
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AlarmError::UnknownAlarm(id))
    }
}
