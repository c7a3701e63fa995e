//! Presence detection probe
//!
//! Interfaces to the external capture and classification services, plus the
//! stateless probe that runs one capture-and-classify round.
//!
//! The capture resource is acquired as a [`CaptureLease`]. Dropping the lease
//! drops the device's frame source, which is where implementations release
//! the camera, so release happens on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DetectionError;

/// One captured image
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// An open capture stream. Implementations release the device on drop.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Frame, DetectionError>;
}

/// Camera that can be opened for exclusive use
pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, DetectionError>;
}

/// Decides whether a person is present in a frame
pub trait PresenceClassifier: Send + Sync {
    fn classify(&self, frame: &Frame) -> Result<bool, DetectionError>;
}

static NEXT_LEASE: AtomicU64 = AtomicU64::new(1);

/// Exclusive hold on a capture device for the life of one session
pub struct CaptureLease {
    id: u64,
    source: Box<dyn FrameSource>,
}

impl CaptureLease {
    pub fn acquire(device: &dyn CaptureDevice) -> Result<Self, DetectionError> {
        let source = device.open()?;
        let id = NEXT_LEASE.fetch_add(1, Ordering::Relaxed);
        log::debug!("[Detection] Capture lease {} acquired", id);
        Ok(Self { id, source })
    }

    /// Probe bound to this lease
    pub fn probe<'a>(&'a mut self, classifier: &'a dyn PresenceClassifier) -> DetectionProbe<'a> {
        DetectionProbe::new(self.source.as_mut(), classifier)
    }
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        log::debug!("[Detection] Capture lease {} released", self.id);
    }
}

/// A single capture-and-classify round. Holds no state between samples.
pub struct DetectionProbe<'a> {
    source: &'a mut dyn FrameSource,
    classifier: &'a dyn PresenceClassifier,
}

impl<'a> DetectionProbe<'a> {
    pub fn new(source: &'a mut dyn FrameSource, classifier: &'a dyn PresenceClassifier) -> Self {
        Self { source, classifier }
    }

    /// Capture one frame and report whether presence was detected
    pub fn sample(&mut self) -> Result<bool, DetectionError> {
        let frame = self.source.capture()?;
        self.classifier.classify(&frame)
    }
}
