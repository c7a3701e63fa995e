//! Dismissal verification
//!
//! A ringing session can only end through its verifier (or a forced stop).
//! The verifier variant is chosen once per session from the dismiss mode:
//!
//! ```text
//!  SingleScan:  Waiting ──scan(code)──► Dismissed
//!
//!  Presence:    Idle ──tick──► Sampling ──progress ≥ 100──► Dismissed
//!                               │   ▲
//!                               └───┘ presence lost: progress = 0
//! ```
//!
//! Both variants share a [`DismissLatch`] so the dismissal callback runs at
//! most once per session, and never after the session was cancelled.

mod presence;
mod scan;

pub use presence::{PresenceTracker, PresenceVerifier, TickOutcome};
pub use scan::ScanVerifier;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TimingConfig;
use crate::detection::{CaptureDevice, PresenceClassifier};
use crate::types::{DetectionState, DismissMode};

/// Called once when the verifier accepts proof of wakefulness
pub type DismissCallback = Box<dyn Fn() + Send + Sync>;

const LATCH_WAITING: u8 = 0;
const LATCH_DISMISSED: u8 = 1;
const LATCH_CANCELLED: u8 = 2;

/// One-shot dismissal guard
///
/// Settles exactly once, either by firing (running the callback) or by being
/// cancelled (dropping it unrun).
pub struct DismissLatch {
    state: AtomicU8,
    on_dismiss: DismissCallback,
}

impl DismissLatch {
    pub fn new(on_dismiss: DismissCallback) -> Self {
        Self {
            state: AtomicU8::new(LATCH_WAITING),
            on_dismiss,
        }
    }

    /// Settle as dismissed and run the callback. Returns false if already settled.
    pub fn fire(&self) -> bool {
        let won = self
            .state
            .compare_exchange(LATCH_WAITING, LATCH_DISMISSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            (self.on_dismiss)();
        }
        won
    }

    /// Settle as cancelled. Returns false if already settled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(LATCH_WAITING, LATCH_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.state.load(Ordering::Acquire) != LATCH_WAITING
    }

    pub fn is_dismissed(&self) -> bool {
        self.state.load(Ordering::Acquire) == LATCH_DISMISSED
    }
}

/// Capture resources and tunables a presence verifier needs
#[derive(Clone)]
pub struct DetectionRig {
    pub device: Arc<dyn CaptureDevice>,
    pub classifier: Arc<dyn PresenceClassifier>,
    pub tick_interval: Duration,
    pub progress_step: u8,
}

impl DetectionRig {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        classifier: Arc<dyn PresenceClassifier>,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            device,
            classifier,
            tick_interval: timing.tick_interval(),
            progress_step: timing.progress_step(),
        }
    }
}

/// Per-session verifier, dispatched once on the dismiss mode
pub enum DismissalVerifier {
    Presence(PresenceVerifier),
    SingleScan(ScanVerifier),
}

impl DismissalVerifier {
    /// Start verifying for a new session
    pub fn start(mode: DismissMode, rig: &DetectionRig, on_dismiss: DismissCallback) -> Self {
        let latch = Arc::new(DismissLatch::new(on_dismiss));
        match mode {
            DismissMode::Presence => DismissalVerifier::Presence(PresenceVerifier::start(rig.clone(), latch)),
            DismissMode::SingleScan => DismissalVerifier::SingleScan(ScanVerifier::new(latch)),
        }
    }

    /// Feed a scanned code. Returns true if this scan dismissed the session.
    ///
    /// Presence verifiers ignore scans.
    pub fn on_scan(&self, code: &str) -> bool {
        match self {
            DismissalVerifier::SingleScan(v) => v.on_scan(code),
            DismissalVerifier::Presence(_) => {
                log::debug!("[Dismissal] Scan ignored in presence mode");
                false
            }
        }
    }

    /// Stop verifying and release any capture resource. Idempotent.
    pub fn cancel(&self) {
        match self {
            DismissalVerifier::Presence(v) => v.cancel(),
            DismissalVerifier::SingleScan(v) => v.cancel(),
        }
    }

    /// Current presence evidence, `None` for scan sessions
    pub fn detection_state(&self) -> Option<DetectionState> {
        match self {
            DismissalVerifier::Presence(v) => Some(v.detection_state()),
            DismissalVerifier::SingleScan(_) => None,
        }
    }
}
