//! Single-scan verification
//!
//! Any well-formed code counts; there is no matching against an expected
//! code. The first accepted scan dismisses, later scans are ignored.

use std::sync::Arc;

use super::DismissLatch;

pub struct ScanVerifier {
    latch: Arc<DismissLatch>,
}

impl ScanVerifier {
    pub fn new(latch: Arc<DismissLatch>) -> Self {
        log::info!("[Dismissal] Waiting for a scan");
        Self { latch }
    }

    /// Returns true if this scan dismissed the session
    pub fn on_scan(&self, code: &str) -> bool {
        if !is_well_formed(code) {
            log::debug!("[Dismissal] Ignoring malformed scan");
            return false;
        }
        if self.latch.fire() {
            log::info!("[Dismissal] Scan accepted, dismissing");
            true
        } else {
            log::debug!("[Dismissal] Scan after session settled, ignored");
            false
        }
    }

    pub fn cancel(&self) {
        self.latch.cancel();
    }

    pub fn is_dismissed(&self) -> bool {
        self.latch.is_dismissed()
    }
}

/// A code is well formed if it has printable, non-blank content
fn is_well_formed(code: &str) -> bool {
    let code = code.trim();
    !code.is_empty() && !code.chars().any(char::is_control)
}
