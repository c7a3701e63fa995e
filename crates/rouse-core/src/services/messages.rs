//! Message types for the alarm service
//!
//! Commands are request/reply: each one that expects an answer carries a
//! oneshot sender. Events are published on the [`EventBus`] to whoever is
//! listening (UI, CLI, logs).

use tokio::sync::oneshot;

use crate::arbiter::DeliveryOutcome;
use crate::engine::EngineStatus;
use crate::error::AlarmResult;
use crate::types::{
    Alarm, AlarmId, DetectionState, DismissMode, RingingSession, SessionEnd, SessionId, TimeOfDay, WakePayload,
};

// ============================================================================
// Alarm Commands
// ============================================================================

/// Commands sent to the AlarmService
pub enum AlarmCommand {
    /// Create an alarm and arm its first wake event
    AddAlarm {
        time_of_day: TimeOfDay,
        label: String,
        dismiss_mode: DismissMode,
        reply: oneshot::Sender<AlarmResult<Alarm>>,
    },

    /// Switch an alarm on or off
    ToggleAlarm {
        id: AlarmId,
        reply: oneshot::Sender<AlarmResult<Alarm>>,
    },

    DeleteAlarm {
        id: AlarmId,
        reply: oneshot::Sender<AlarmResult<Alarm>>,
    },

    /// All alarms, ordered by time of day
    ListAlarms {
        reply: oneshot::Sender<Vec<Alarm>>,
    },

    /// A wake event arrived from the wake-event layer
    DeliverWake {
        payload: WakePayload,
        reply: oneshot::Sender<DeliveryOutcome>,
    },

    /// A code was scanned; the reply says whether it dismissed the session
    Scan {
        code: String,
        reply: oneshot::Sender<bool>,
    },

    /// Emergency stop: end the ringing session without verification
    ForceStop {
        reply: oneshot::Sender<Option<RingingSession>>,
    },

    Status {
        reply: oneshot::Sender<EngineStatus>,
    },

    /// Shutdown the service
    Shutdown,
}

// ============================================================================
// Alarm Events (Broadcast)
// ============================================================================

/// Events published by the alarm service
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEvent {
    // --- Alarm Events ---
    /// An alarm holds a freshly armed wake event
    AlarmArmed(Alarm),

    /// An alarm no longer holds a wake event (switched off or deleted)
    AlarmDisarmed(AlarmId),

    /// Arming failed; the alarm is not armed
    SchedulingFailed {
        alarm_id: Option<AlarmId>,
        error: String,
    },

    // --- Session Events ---
    RingingStarted(RingingSession),

    /// Audio could not start; the session rings silently
    PlaybackFailed {
        session_id: SessionId,
        error: String,
    },

    /// Presence evidence changed
    DetectionProgress {
        session_id: SessionId,
        state: DetectionState,
    },

    SessionEnded {
        session: RingingSession,
        reason: SessionEnd,
    },

    // --- Service Events ---
    ServiceStarted {
        service_name: String,
    },

    ServiceStopped {
        service_name: String,
    },
}

// ============================================================================
// Service Handle
// ============================================================================

/// Handle for communicating with a background service
pub struct ServiceHandle<Cmd> {
    /// Channel for sending commands to the service
    pub command_tx: crossbeam::channel::Sender<Cmd>,
    /// Thread handle for the service
    pub thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl<Cmd> ServiceHandle<Cmd> {
    /// Whether the service thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the service thread to exit
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[Service] Thread panicked");
            }
        }
    }
}

/// Event bus shared by the service and its listeners
pub struct EventBus {
    sender: crossbeam::channel::Sender<AlarmEvent>,
    receiver: crossbeam::channel::Receiver<AlarmEvent>,
}

impl EventBus {
    /// Create a new event bus with bounded capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Get a sender for publishing events
    pub fn sender(&self) -> crossbeam::channel::Sender<AlarmEvent> {
        self.sender.clone()
    }

    /// Get a receiver for subscribing to events
    pub fn subscribe(&self) -> crossbeam::channel::Receiver<AlarmEvent> {
        self.receiver.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
