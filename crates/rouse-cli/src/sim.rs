//! Simulated platform services for headless runs
//!
//! - [`SimulatedWakeLayer`] arms each wake event on its own thread and
//!   delivers it the way a flaky notification layer does: optionally early,
//!   and once per configured channel.
//! - [`SimulatedCamera`] / [`FlagClassifier`] report presence from a flag the
//!   REPL flips with `present` / `absent`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use crossbeam::channel::{self, Sender};

use rouse_core::clock::Clock;
use rouse_core::detection::{CaptureDevice, Frame, FrameSource, PresenceClassifier};
use rouse_core::scheduler::WakeLayer;
use rouse_core::{DetectionError, WakeHandle, WakeLayerError, WakePayload};

// ============================================================================
// Wake events
// ============================================================================

/// How the simulated layer misbehaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Also deliver this long before the target
    pub early_by: Option<Duration>,
    /// Number of channels delivering the on-time event (at least one)
    pub channels: usize,
    /// Gap between channel deliveries
    pub channel_gap: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            early_by: None,
            channels: 2,
            channel_gap: Duration::from_millis(15),
        }
    }
}

impl DeliveryOptions {
    /// Delivery offsets from now, in firing order
    fn schedule(&self, until_target: Duration) -> Vec<Duration> {
        let mut offsets = Vec::new();
        if let Some(early) = self.early_by {
            offsets.push(until_target.saturating_sub(early));
        }
        for i in 0..self.channels.max(1) {
            offsets.push(until_target + self.channel_gap * i as u32);
        }
        offsets
    }
}

struct ArmedEvent {
    payload: WakePayload,
    cancel_tx: Sender<()>,
}

/// Thread-per-event wake layer delivering payloads to a channel
pub struct SimulatedWakeLayer {
    deliveries: Sender<WakePayload>,
    options: DeliveryOptions,
    clock: Arc<dyn Clock>,
    armed: Mutex<HashMap<WakeHandle, ArmedEvent>>,
    next_id: AtomicU64,
}

impl SimulatedWakeLayer {
    pub fn new(deliveries: Sender<WakePayload>, options: DeliveryOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            deliveries,
            options,
            clock,
            armed: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver an armed event right away, as if the platform fired it now
    pub fn fire_now(&self, handle: &WakeHandle) -> bool {
        let payload = self
            .armed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(handle)
            .map(|armed| armed.payload.clone());

        match payload {
            Some(payload) => self.deliveries.send(payload).is_ok(),
            None => false,
        }
    }

    fn spawn_deliveries(&self, handle: &WakeHandle, target: NaiveDateTime, payload: WakePayload) -> Result<Sender<()>, WakeLayerError> {
        let until_target = (target - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let offsets = self.options.schedule(until_target);
        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
        let deliveries = self.deliveries.clone();
        let name = handle.to_string();

        thread::Builder::new()
            .name(format!("wake-{}", name))
            .spawn(move || {
                let mut elapsed = Duration::ZERO;
                for (channel_no, offset) in offsets.into_iter().enumerate() {
                    let wait = offset.saturating_sub(elapsed);
                    elapsed = offset.max(elapsed);
                    crossbeam::select! {
                        recv(cancel_rx) -> _ => {
                            log::debug!("[WakeSim] {} cancelled", name);
                            return;
                        }
                        recv(channel::after(wait)) -> _ => {
                            log::info!("[WakeSim] Delivering {} (delivery {})", name, channel_no + 1);
                            if deliveries.send(payload.clone()).is_err() {
                                return;
                            }
                        }
                    }
                }
            })
            .map_err(|e| WakeLayerError(format!("failed to start wake thread: {}", e)))?;

        Ok(cancel_tx)
    }
}

impl WakeLayer for SimulatedWakeLayer {
    fn arm(&self, target: NaiveDateTime, payload: WakePayload) -> Result<WakeHandle, WakeLayerError> {
        let handle = WakeHandle::new(format!("sim-{}", self.next_id.fetch_add(1, Ordering::Relaxed)));
        let cancel_tx = self.spawn_deliveries(&handle, target, payload.clone())?;

        log::info!("[WakeSim] Armed {} for {}", handle, target);
        self.armed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(handle.clone(), ArmedEvent { payload, cancel_tx });
        Ok(handle)
    }

    fn cancel(&self, handle: &WakeHandle) {
        let removed = self.armed.lock().unwrap_or_else(|p| p.into_inner()).remove(handle);
        if let Some(armed) = removed {
            // The thread may already be done; nothing to cancel then
            let _ = armed.cancel_tx.try_send(());
            log::info!("[WakeSim] Cancelled {}", handle);
        }
    }
}

// ============================================================================
// Camera
// ============================================================================

/// Camera whose frames encode the shared presence flag
pub struct SimulatedCamera {
    present: Arc<AtomicBool>,
}

impl SimulatedCamera {
    pub fn new(present: Arc<AtomicBool>) -> Self {
        Self { present }
    }
}

impl CaptureDevice for SimulatedCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, DetectionError> {
        log::info!("[CameraSim] Camera opened");
        Ok(Box::new(SimulatedStream {
            present: Arc::clone(&self.present),
        }))
    }
}

struct SimulatedStream {
    present: Arc<AtomicBool>,
}

impl FrameSource for SimulatedStream {
    fn capture(&mut self) -> Result<Frame, DetectionError> {
        Ok(Frame {
            data: vec![u8::from(self.present.load(Ordering::Relaxed))],
            width: 1,
            height: 1,
        })
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        log::info!("[CameraSim] Camera released");
    }
}

/// Reads the presence byte written by [`SimulatedCamera`]
pub struct FlagClassifier;

impl PresenceClassifier for FlagClassifier {
    fn classify(&self, frame: &Frame) -> Result<bool, DetectionError> {
        match frame.data.first() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(DetectionError::Classify("empty frame".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, NaiveDate};
    use rouse_core::clock::SystemClock;
    use rouse_core::DismissMode;

    fn payload(target: NaiveDateTime) -> WakePayload {
        WakePayload {
            target_time: target,
            label: "Test".into(),
            dismiss_mode: DismissMode::SingleScan,
            alarm_id: None,
        }
    }

    #[test]
    fn test_schedule_orders_early_then_channels() {
        let options = DeliveryOptions {
            early_by: Some(Duration::from_secs(5)),
            channels: 3,
            channel_gap: Duration::from_millis(10),
        };
        let offsets = options.schedule(Duration::from_secs(60));
        assert_eq!(
            offsets,
            vec![
                Duration::from_secs(55),
                Duration::from_secs(60),
                Duration::from_millis(60_010),
                Duration::from_millis(60_020),
            ]
        );
    }

    #[test]
    fn test_zero_channels_still_delivers_once() {
        let options = DeliveryOptions {
            channels: 0,
            ..DeliveryOptions::default()
        };
        assert_eq!(options.schedule(Duration::ZERO), vec![Duration::ZERO]);
    }

    #[test]
    fn test_due_event_is_delivered_per_channel() {
        let (tx, rx) = channel::unbounded();
        let layer = SimulatedWakeLayer::new(tx, DeliveryOptions::default(), Arc::new(SystemClock));
        let target = Local::now().naive_local();

        layer.arm(target, payload(target)).unwrap();
        for _ in 0..2 {
            let delivered = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(delivered.target_time, target);
        }
    }

    #[test]
    fn test_cancelled_event_is_never_delivered() {
        let (tx, rx) = channel::unbounded();
        let layer = SimulatedWakeLayer::new(tx, DeliveryOptions::default(), Arc::new(SystemClock));
        let target = Local::now().naive_local() + chrono::Duration::milliseconds(200);

        let handle = layer.arm(target, payload(target)).unwrap();
        layer.cancel(&handle);
        layer.cancel(&handle);
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert!(!layer.fire_now(&handle));
    }

    #[test]
    fn test_fire_now_delivers_armed_payload() {
        let (tx, rx) = channel::unbounded();
        let layer = SimulatedWakeLayer::new(tx, DeliveryOptions::default(), Arc::new(SystemClock));
        let target = NaiveDate::from_ymd_opt(2099, 1, 1)
            .and_then(|d| d.and_hms_opt(7, 0, 0))
            .unwrap();

        let handle = layer.arm(target, payload(target)).unwrap();
        assert!(layer.fire_now(&handle));
        assert_eq!(rx.try_recv().unwrap().target_time, target);
        layer.cancel(&handle);
    }

    #[test]
    fn test_camera_frames_follow_presence_flag() {
        let present = Arc::new(AtomicBool::new(false));
        let camera = SimulatedCamera::new(Arc::clone(&present));
        let mut stream = camera.open().unwrap();

        assert_eq!(FlagClassifier.classify(&stream.capture().unwrap()), Ok(false));
        present.store(true, Ordering::Relaxed);
        assert_eq!(FlagClassifier.classify(&stream.capture().unwrap()), Ok(true));
    }
}
