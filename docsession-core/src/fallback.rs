use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// One-shot gate for unsupported-feature escalation. A document with many
/// unsupported constructs must only prompt the user once.
#[derive(Debug)]
pub struct FallbackLatch {
    armed: AtomicBool,
}

impl FallbackLatch {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }

    /// True only for the first call since the latch was last armed.
    pub fn trigger(&self, feature_id: &str) -> bool {
        let escalate = self.armed.swap(false, Ordering::AcqRel);
        if !escalate {
            debug!(feature_id, "fallback already shown for this document");
        }
        escalate
    }

    pub fn rearm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn fell_back(&self) -> bool {
        !self.armed.load(Ordering::Acquire)
    }
}

impl Default for FallbackLatch {
    fn default() -> Self {
        Self::new()
    }
}
