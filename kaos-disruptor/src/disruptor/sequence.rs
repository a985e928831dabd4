//! Cache-line padded sequence counter.
//!
//! Every actor (the ring cursor, each consumer, the multi-producer claim
//! counter) publishes its progress through one `Sequence`. Exactly one thread
//! writes a given instance; any number of threads read it.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Value of a sequence before anything was produced or consumed.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Padded to 128 bytes so adjacent sequences never share a cache line
/// (adjacent-line prefetch pulls pairs of 64-byte lines on x86).
#[repr(align(128))]
pub struct Sequence {
    value: AtomicI64,
}

impl Sequence {
    pub const fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Acquire load: everything written before the matching `set` is visible.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Release store. Only the owning thread may call this.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub(crate) fn relaxed(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_relaxed(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Atomically add `delta`, returning the new value.
    #[inline]
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }

    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    #[inline]
    pub fn compare_and_set(&self, current: i64, new: i64) -> bool {
        self.value
            .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

/// Minimum of `sequences`, or `default` when the slice is empty.
#[inline]
pub fn minimum_sequence(sequences: &[Arc<Sequence>], default: i64) -> i64 {
    sequences
        .iter()
        .map(|s| s.get())
        .min()
        .unwrap_or(default)
}
