//! RingBuffer - pre-allocated slots plus the published cursor.
//!
//! The buffer itself provides no synchronization. Slot access is coordinated
//! by sequences: a producer writes only slots it claimed, a consumer reads only
//! slots at or below what its barrier reports as available.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::disruptor::barrier::ConsumerBarrier;
use crate::disruptor::claim::{ClaimStrategy, ProducerType};
use crate::disruptor::producer::ProducerBarrier;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::wait::WaitStrategy;
use crate::disruptor::{RingBufferConfig, RingBufferEntry};
use crate::error::{DisruptorError, Result};

pub struct RingBuffer<T: RingBufferEntry> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    cursor: Sequence,
    claim: ClaimStrategy,
    wait_strategy: WaitStrategy,
    producer_taken: AtomicBool,
}

// SAFETY: slots are only touched through claimed or published sequences; the
// claim/publish protocol keeps writers and readers of one slot apart.
unsafe impl<T: RingBufferEntry> Send for RingBuffer<T> {}
unsafe impl<T: RingBufferEntry> Sync for RingBuffer<T> {}

impl<T: RingBufferEntry> RingBuffer<T> {
    pub fn new(config: RingBufferConfig) -> Result<Self> {
        if config.size == 0 || !config.size.is_power_of_two() {
            return Err(DisruptorError::config("Ring buffer size must be a power of 2"));
        }

        let slots = (0..config.size)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        trace_debug!(
            size = config.size,
            producer = ?config.producer_type,
            wait = config.wait_strategy.name(),
            "ring buffer created"
        );

        Ok(Self {
            slots,
            mask: config.size - 1,
            cursor: Sequence::default(),
            claim: ClaimStrategy::new(config.producer_type),
            wait_strategy: config.wait_strategy,
            producer_taken: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest fully published sequence.
    #[inline]
    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    #[inline]
    pub fn producer_type(&self) -> ProducerType {
        self.claim.producer_type()
    }

    #[inline]
    pub fn wait_strategy(&self) -> &WaitStrategy {
        &self.wait_strategy
    }

    #[inline]
    pub(crate) fn cursor_sequence(&self) -> &Sequence {
        &self.cursor
    }

    /// Slot for `sequence`. Only the mask is applied.
    ///
    /// # Safety
    ///
    /// - `sequence` must be published and not yet reclaimable by a producer,
    ///   i.e. the caller's own sequence must gate the producers.
    #[inline]
    pub unsafe fn get_entry(&self, sequence: i64) -> &T {
        let idx = (sequence as usize) & self.mask;
        &*self.slots.get_unchecked(idx).get()
    }

    /// Mutable slot for `sequence`.
    ///
    /// # Safety
    ///
    /// - `sequence` must have been claimed by the caller and not yet published.
    /// - No other reference to the same slot may be alive.
    #[inline]
    #[allow(clippy::mut_from_ref)] // Intentional: exclusivity comes from the claim
    pub unsafe fn get_entry_mut(&self, sequence: i64) -> &mut T {
        let idx = (sequence as usize) & self.mask;
        &mut *self.slots.get_unchecked(idx).get()
    }

    /// Barrier for a consumer that depends on `dependents` (empty: only on the cursor).
    pub fn consumer_barrier(self: &Arc<Self>, dependents: &[Arc<Sequence>]) -> ConsumerBarrier<T> {
        ConsumerBarrier::new(Arc::clone(self), dependents.to_vec())
    }

    /// Producer gated on `gating`, normally the sequences of the last consumers
    /// in the dependency graph.
    ///
    /// In single-producer mode only one producer barrier may exist.
    pub fn producer_barrier(
        self: &Arc<Self>,
        gating: &[Arc<Sequence>],
    ) -> Result<ProducerBarrier<T>> {
        if self.producer_type() == ProducerType::Single
            && self.producer_taken.swap(true, Ordering::AcqRel)
        {
            return Err(DisruptorError::config(
                "single-producer ring buffer already has a producer",
            ));
        }
        Ok(ProducerBarrier::new(Arc::clone(self), gating.to_vec()))
    }

    /// Claim `n` sequences and stamp each slot. Returns the highest claimed.
    pub(crate) fn claim(&self, n: usize, gating: &[Arc<Sequence>]) -> i64 {
        assert!(
            n >= 1 && n <= self.capacity(),
            "claim size must be between 1 and the ring capacity"
        );
        let hi = self.claim.claim(n as i64, self.capacity() as i64, gating);
        self.stamp(hi - n as i64 + 1, hi);
        hi
    }

    pub(crate) fn try_claim(&self, n: usize, gating: &[Arc<Sequence>]) -> Option<i64> {
        if n == 0 || n > self.capacity() {
            return None;
        }
        let hi = self
            .claim
            .try_claim(n as i64, self.capacity() as i64, gating)?;
        self.stamp(hi - n as i64 + 1, hi);
        Some(hi)
    }

    /// Publish `lo..=hi` and wake blocked consumers.
    pub(crate) fn publish(&self, lo: i64, hi: i64) {
        self.claim.publish(&self.cursor, lo, hi);
        self.wait_strategy.signal_all_when_blocking();
    }

    pub(crate) fn remaining_capacity(&self, gating: &[Arc<Sequence>]) -> i64 {
        self.claim
            .remaining_capacity(self.capacity() as i64, gating)
    }

    fn stamp(&self, lo: i64, hi: i64) {
        for seq in lo..=hi {
            // SAFETY: lo..=hi was just claimed by this thread
            let slot = unsafe { self.get_entry_mut(seq) };
            slot.reset();
            slot.set_sequence(seq);
        }
    }
}

impl<T: RingBufferEntry> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor())
            .field("producer_type", &self.producer_type())
            .field("wait_strategy", &self.wait_strategy.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{Slot8, ValueSlot};

    fn ring(size: usize) -> Arc<RingBuffer<Slot8>> {
        Arc::new(RingBuffer::new(RingBufferConfig::new(size).unwrap()).unwrap())
    }

    #[test]
    fn test_invalid_size() {
        let config = RingBufferConfig {
            size: 1000,
            ..Default::default()
        };
        assert!(RingBuffer::<Slot8>::new(config).is_err());
    }

    #[test]
    fn test_preallocated_slots() {
        let ring = ring(8);
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.cursor(), -1);
        for seq in 0..8 {
            assert_eq!(unsafe { ring.get_entry(seq).value }, 0);
        }
    }

    #[test]
    fn test_claim_stamps_sequence() {
        let ring = Arc::new(
            RingBuffer::<ValueSlot<u32>>::new(RingBufferConfig::new(4).unwrap()).unwrap(),
        );
        let hi = ring.claim(2, &[]);
        assert_eq!(hi, 1);
        assert_eq!(unsafe { ring.get_entry(0).sequence() }, 0);
        assert_eq!(unsafe { ring.get_entry(1).sequence() }, 1);
        // not visible until published
        assert_eq!(ring.cursor(), -1);
        ring.publish(0, 1);
        assert_eq!(ring.cursor(), 1);
    }

    #[test]
    fn test_index_wraps_with_mask() {
        let ring = ring(4);
        ring.claim(4, &[]);
        unsafe { ring.get_entry_mut(0).value = 11 };
        ring.publish(0, 3);

        ring.claim(1, &[]);
        assert_eq!(unsafe { ring.get_entry(4).sequence() }, 4);
        // sequence 4 reuses the slot of sequence 0, reset cleared the payload
        assert_eq!(unsafe { ring.get_entry(0).value }, 0);
    }

    #[test]
    fn test_single_producer_barrier_is_exclusive() {
        let ring = ring(8);
        let _producer = ring.producer_barrier(&[]).unwrap();
        assert!(ring.producer_barrier(&[]).is_err());
    }

    #[test]
    fn test_multi_producer_barriers() {
        let config = RingBufferConfig::new(8)
            .unwrap()
            .with_producer_type(ProducerType::Multi);
        let ring = Arc::new(RingBuffer::<Slot8>::new(config).unwrap());
        assert!(ring.producer_barrier(&[]).is_ok());
        assert!(ring.producer_barrier(&[]).is_ok());
    }

    #[test]
    #[should_panic(expected = "claim size must be between 1 and the ring capacity")]
    fn test_claim_larger_than_ring() {
        ring(4).claim(5, &[]);
    }
}
