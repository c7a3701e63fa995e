//! AlarmService - the single thread that owns the alarm engine
//!
//! Commands from clients and session events from the arbiter are handled
//! one at a time on this thread. A ticker at the presence polling cadence
//! publishes detection progress while a presence session rings.

use std::thread;

use crossbeam::channel::{Receiver, Sender};
use tokio::sync::oneshot;

use super::messages::{AlarmCommand, AlarmEvent, ServiceHandle};
use crate::arbiter::{DeliveryOutcome, SessionEvent};
use crate::engine::{AlarmEngine, EngineStatus, FollowUp};
use crate::error::{AlarmError, AlarmResult};
use crate::types::{Alarm, AlarmId, DetectionState, DismissMode, RingingSession, SessionId, TimeOfDay, WakePayload};

const SERVICE_NAME: &str = "AlarmService";

/// AlarmService runs engine commands in a background thread
pub struct AlarmService {
    engine: AlarmEngine,
    command_rx: Receiver<AlarmCommand>,
    event_tx: Sender<AlarmEvent>,
    /// Last published presence evidence, to publish only changes
    last_progress: Option<(SessionId, DetectionState)>,
}

impl AlarmService {
    /// Spawn a new AlarmService in a background thread
    pub fn spawn(engine: AlarmEngine, event_tx: Sender<AlarmEvent>) -> Result<ServiceHandle<AlarmCommand>, String> {
        let (command_tx, command_rx) = crossbeam::channel::unbounded();

        let service = AlarmService {
            engine,
            command_rx,
            event_tx: event_tx.clone(),
            last_progress: None,
        };

        let handle = thread::Builder::new()
            .name("alarm-service".into())
            .spawn(move || {
                service.run();
            })
            .map_err(|e| format!("Failed to spawn alarm service thread: {}", e))?;

        let _ = event_tx.try_send(AlarmEvent::ServiceStarted {
            service_name: SERVICE_NAME.to_string(),
        });

        Ok(ServiceHandle {
            command_tx,
            thread_handle: Some(handle),
        })
    }

    /// Main service loop
    fn run(mut self) {
        log::info!("[AlarmService] Started");

        let command_rx = self.command_rx.clone();
        let session_rx = self.engine.session_events().clone();
        let progress_tick = crossbeam::channel::tick(self.engine.tick_interval());

        loop {
            crossbeam::select! {
                recv(command_rx) -> cmd => {
                    match cmd {
                        Ok(AlarmCommand::Shutdown) => {
                            log::info!("[AlarmService] Shutting down");
                            break;
                        }
                        Ok(cmd) => self.handle_command(cmd),
                        Err(_) => {
                            log::info!("[AlarmService] Command channel closed, shutting down");
                            break;
                        }
                    }
                }
                recv(session_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_session_event(event);
                    }
                }
                recv(progress_tick) -> _ => {
                    self.publish_progress();
                }
            }
        }

        self.engine.shutdown();
        // The forced stop above produces a final session event
        while let Ok(event) = session_rx.try_recv() {
            self.handle_session_event(event);
        }

        self.publish(AlarmEvent::ServiceStopped {
            service_name: SERVICE_NAME.to_string(),
        });
        log::info!("[AlarmService] Stopped");
    }

    /// Handle a command
    fn handle_command(&mut self, cmd: AlarmCommand) {
        match cmd {
            AlarmCommand::AddAlarm {
                time_of_day,
                label,
                dismiss_mode,
                reply,
            } => {
                let result = self.engine.add_alarm(time_of_day, &label, dismiss_mode);
                match &result {
                    Ok(alarm) => self.publish(AlarmEvent::AlarmArmed(alarm.clone())),
                    Err(e) => self.publish_failure(None, e),
                }
                let _ = reply.send(result);
            }

            AlarmCommand::ToggleAlarm { id, reply } => {
                let result = self.engine.toggle_alarm(id);
                match &result {
                    Ok(alarm) if alarm.active => self.publish(AlarmEvent::AlarmArmed(alarm.clone())),
                    Ok(_) => self.publish(AlarmEvent::AlarmDisarmed(id)),
                    Err(e) => self.publish_failure(Some(id), e),
                }
                let _ = reply.send(result);
            }

            AlarmCommand::DeleteAlarm { id, reply } => {
                let result = self.engine.delete_alarm(id);
                if result.is_ok() {
                    self.publish(AlarmEvent::AlarmDisarmed(id));
                }
                let _ = reply.send(result);
            }

            AlarmCommand::ListAlarms { reply } => {
                let _ = reply.send(self.engine.alarms());
            }

            AlarmCommand::DeliverWake { payload, reply } => {
                let outcome = self.engine.deliver(payload);
                let _ = reply.send(outcome);
            }

            AlarmCommand::Scan { code, reply } => {
                let _ = reply.send(self.engine.scan(&code));
            }

            AlarmCommand::ForceStop { reply } => {
                let _ = reply.send(self.engine.force_stop());
            }

            AlarmCommand::Status { reply } => {
                let _ = reply.send(self.engine.status());
            }

            AlarmCommand::Shutdown => {
                // Handled in main loop
            }
        }
    }

    /// Translate a session event and follow up on the fired alarm
    fn handle_session_event(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::Started {
                session,
                playback_error,
            } => {
                self.last_progress = None;
                self.publish(AlarmEvent::RingingStarted(session.clone()));
                if let Some(e) = playback_error {
                    self.publish(AlarmEvent::PlaybackFailed {
                        session_id: session.id,
                        error: e.to_string(),
                    });
                }
            }
            SessionEvent::Ended { session, reason } => {
                self.last_progress = None;
                self.publish(AlarmEvent::SessionEnded {
                    session: session.clone(),
                    reason: *reason,
                });
            }
        }

        match self.engine.on_session_event(&event) {
            Ok(FollowUp::Rearmed(alarm)) => self.publish(AlarmEvent::AlarmArmed(alarm)),
            Ok(FollowUp::Disarmed(id)) => self.publish(AlarmEvent::AlarmDisarmed(id)),
            Ok(FollowUp::None) => {}
            Err(e) => {
                let id = match &event {
                    SessionEvent::Ended { session, .. } => session.alarm_id,
                    SessionEvent::Started { .. } => None,
                };
                self.publish_failure(id, &e);
            }
        }
    }

    fn publish_progress(&mut self) {
        let status = self.engine.status();
        let (Some(session), Some(state)) = (status.session, status.detection) else {
            return;
        };
        if self.last_progress == Some((session.id, state)) {
            return;
        }
        self.last_progress = Some((session.id, state));
        self.publish(AlarmEvent::DetectionProgress {
            session_id: session.id,
            state,
        });
    }

    /// Only arm failures reach listeners; transient failures are just logged
    fn publish_failure(&self, alarm_id: Option<AlarmId>, error: &AlarmError) {
        if error.is_recoverable() {
            log::warn!("[AlarmService] {}", error);
            return;
        }
        log::error!("[AlarmService] {}", error);
        if let AlarmError::SchedulingFailed(_) = error {
            self.publish(AlarmEvent::SchedulingFailed {
                alarm_id,
                error: error.to_string(),
            });
        }
    }

    /// Never blocks the engine thread on a slow listener
    fn publish(&self, event: AlarmEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            log::debug!("[AlarmService] Event dropped: {}", e);
        }
    }
}

/// Client for interacting with AlarmService
///
/// Provides a synchronous API over the service thread.
#[derive(Clone)]
pub struct AlarmClient {
    command_tx: Sender<AlarmCommand>,
}

impl AlarmClient {
    /// Create a new client from a service handle
    pub fn new(handle: &ServiceHandle<AlarmCommand>) -> Self {
        Self {
            command_tx: handle.command_tx.clone(),
        }
    }

    /// Create an alarm (blocking)
    pub fn add_alarm(&self, time_of_day: TimeOfDay, label: &str, dismiss_mode: DismissMode) -> AlarmResult<Alarm> {
        self.request(|reply| AlarmCommand::AddAlarm {
            time_of_day,
            label: label.to_string(),
            dismiss_mode,
            reply,
        })?
    }

    /// Switch an alarm on or off (blocking)
    pub fn toggle_alarm(&self, id: AlarmId) -> AlarmResult<Alarm> {
        self.request(|reply| AlarmCommand::ToggleAlarm { id, reply })?
    }

    /// Delete an alarm (blocking)
    pub fn delete_alarm(&self, id: AlarmId) -> AlarmResult<Alarm> {
        self.request(|reply| AlarmCommand::DeleteAlarm { id, reply })?
    }

    /// List alarms (blocking)
    pub fn list_alarms(&self) -> AlarmResult<Vec<Alarm>> {
        self.request(|reply| AlarmCommand::ListAlarms { reply })
    }

    /// Hand a wake-event delivery to the engine (blocking)
    pub fn deliver_wake(&self, payload: WakePayload) -> AlarmResult<DeliveryOutcome> {
        self.request(|reply| AlarmCommand::DeliverWake { payload, reply })
    }

    /// Report a scanned code (blocking)
    pub fn scan(&self, code: &str) -> AlarmResult<bool> {
        self.request(|reply| AlarmCommand::Scan {
            code: code.to_string(),
            reply,
        })
    }

    /// Emergency stop (blocking)
    pub fn force_stop(&self) -> AlarmResult<Option<RingingSession>> {
        self.request(|reply| AlarmCommand::ForceStop { reply })
    }

    /// Engine status (blocking)
    pub fn status(&self) -> AlarmResult<EngineStatus> {
        self.request(|reply| AlarmCommand::Status { reply })
    }

    /// Shutdown the service
    pub fn shutdown(&self) -> AlarmResult<()> {
        self.command_tx
            .send(AlarmCommand::Shutdown)
            .map_err(|e| AlarmError::ServiceUnavailable(e.to_string()))
    }

    fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> AlarmCommand) -> AlarmResult<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(command(tx))
            .map_err(|e| AlarmError::ServiceUnavailable(e.to_string()))?;

        rx.blocking_recv()
            .map_err(|e| AlarmError::ServiceUnavailable(e.to_string()))
    }
}
