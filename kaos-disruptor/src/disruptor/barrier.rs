//! ConsumerBarrier - where a consumer learns which slots it may read.
//!
//! Available = min(ring cursor, upstream consumer sequences). Clones share the
//! alert/interrupt state, so one `alert()` wakes every thread parked on any
//! clone of the barrier.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::disruptor::alert::WaitSignal;
use crate::disruptor::ring_buffer::RingBuffer;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::wait::available_sequence;
use crate::disruptor::RingBufferEntry;
use crate::error::{DisruptorError, Result};

pub struct ConsumerBarrier<T: RingBufferEntry> {
    ring: Arc<RingBuffer<T>>,
    dependents: Vec<Arc<Sequence>>,
    signal: Arc<WaitSignal>,
}

impl<T: RingBufferEntry> Clone for ConsumerBarrier<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            dependents: self.dependents.clone(),
            signal: Arc::clone(&self.signal),
        }
    }
}

impl<T: RingBufferEntry> ConsumerBarrier<T> {
    pub(crate) fn new(ring: Arc<RingBuffer<T>>, dependents: Vec<Arc<Sequence>>) -> Self {
        Self {
            ring,
            dependents,
            signal: Arc::new(WaitSignal::new()),
        }
    }

    /// Slot for `sequence`.
    ///
    /// # Safety
    ///
    /// - `sequence` must be `<=` a value previously returned by `wait_for`
    ///   or `available_sequence`.
    /// - The caller's sequence must still be below `sequence` in the gating
    ///   set of every producer, so the slot cannot be reclaimed while read.
    #[inline]
    pub unsafe fn get_entry(&self, sequence: i64) -> &T {
        self.ring.get_entry(sequence)
    }

    /// Highest sequence published and processed by every upstream consumer.
    #[inline]
    pub fn available_sequence(&self) -> i64 {
        available_sequence(self.ring.cursor_sequence(), &self.dependents)
    }

    /// Block until `sequence` is available. Returns the available sequence,
    /// which may be higher so the caller can process a batch.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.signal.check()?;
        self.ring.wait_strategy().wait_for(
            sequence,
            self.ring.cursor_sequence(),
            &self.dependents,
            &self.signal,
            None,
        )
    }

    /// As `wait_for`, but gives up after `timeout` and returns the best
    /// available sequence, which may still be below `sequence`. A timeout
    /// too large to represent waits without a deadline.
    pub fn wait_for_timeout(&self, sequence: i64, timeout: Duration) -> Result<i64> {
        self.signal.check()?;
        self.ring.wait_strategy().wait_for(
            sequence,
            self.ring.cursor_sequence(),
            &self.dependents,
            &self.signal,
            Instant::now().checked_add(timeout),
        )
    }

    /// Wake every waiter with `Alert`. Sticky until `clear_alert`.
    pub fn alert(&self) {
        self.signal.alert();
        self.ring.wait_strategy().signal_all_when_blocking();
    }

    pub fn clear_alert(&self) {
        self.signal.clear_alert();
    }

    pub fn is_alerted(&self) -> bool {
        self.signal.is_alerted()
    }

    pub fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            return Err(DisruptorError::Alert);
        }
        Ok(())
    }

    /// Request a one-shot wake. The first waiter to notice returns `Interrupted`.
    pub fn interrupt(&self) {
        self.signal.interrupt();
        self.ring.wait_strategy().signal_all_when_blocking();
    }

    pub fn cursor(&self) -> i64 {
        self.ring.cursor()
    }

    pub fn dependents(&self) -> &[Arc<Sequence>] {
        &self.dependents
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }
}

impl<T: RingBufferEntry> fmt::Debug for ConsumerBarrier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBarrier")
            .field("cursor", &self.cursor())
            .field("available", &self.available_sequence())
            .field("dependents", &self.dependents.len())
            .field("alerted", &self.is_alerted())
            .finish()
    }
}
