//! Out-of-band wake signals shared by every clone of a consumer barrier.
//!
//! - alert: sticky until cleared, used for shutdown
//! - interrupt: one-shot, consumed by the first waiter that observes it

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DisruptorError, Result};

#[derive(Debug, Default)]
#[repr(align(128))]
pub struct WaitSignal {
    alerted: AtomicBool,
    interrupted: AtomicBool,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
    }

    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_interrupt_pending(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Called on every wait iteration. Alert wins over a pending interrupt.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_alerted() {
            return Err(DisruptorError::Alert);
        }
        // Plain load first so the common path stays free of RMW traffic
        if self.interrupted.load(Ordering::Relaxed)
            && self.interrupted.swap(false, Ordering::AcqRel)
        {
            return Err(DisruptorError::Interrupted);
        }
        Ok(())
    }
}
