//! ProducerBarrier - claim, write and publish.
//!
//! A claim never succeeds while it would overwrite a slot some gating consumer
//! has not passed, and publish never makes a slot visible before its payload.
//!
//! ```rust,ignore
//! let producer = ring.producer_barrier(&[consumer.sequence()])?;
//! producer.publish_with(|slot, seq| slot.value = seq as u64);
//!
//! let mut claim = producer.next_entry();
//! claim.value = 42;
//! claim.publish(); // or just drop it
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::disruptor::claim::ProducerType;
use crate::disruptor::ring_buffer::RingBuffer;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::RingBufferEntry;
use crate::error::{DisruptorError, Result};

pub struct ProducerBarrier<T: RingBufferEntry> {
    ring: Arc<RingBuffer<T>>,
    gating: Vec<Arc<Sequence>>,
}

impl<T: RingBufferEntry> ProducerBarrier<T> {
    pub(crate) fn new(ring: Arc<RingBuffer<T>>, gating: Vec<Arc<Sequence>>) -> Self {
        Self { ring, gating }
    }

    /// Another handle on the same ring and gating set. Multi-producer only.
    pub fn try_clone(&self) -> Result<Self> {
        if self.ring.producer_type() != ProducerType::Multi {
            return Err(DisruptorError::config(
                "only multi-producer barriers can be cloned",
            ));
        }
        Ok(Self {
            ring: Arc::clone(&self.ring),
            gating: self.gating.clone(),
        })
    }

    /// Claim the next sequence, blocking until its slot is free.
    #[inline]
    pub fn claim_next(&self) -> i64 {
        self.ring.claim(1, &self.gating)
    }

    /// Claim `n` contiguous sequences. Returns the highest one; the batch is
    /// `hi - n + 1 ..= hi`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0 or larger than the ring.
    #[inline]
    pub fn claim(&self, n: usize) -> i64 {
        self.ring.claim(n, &self.gating)
    }

    /// Claim `n` sequences or return `None` if the ring lacks room.
    #[inline]
    pub fn try_claim(&self, n: usize) -> Option<i64> {
        self.ring.try_claim(n, &self.gating)
    }

    /// Slot for a claimed sequence.
    ///
    /// # Safety
    ///
    /// - `sequence` must have been claimed through this barrier and not yet
    ///   published.
    /// - No other reference to the slot may be alive.
    #[inline]
    #[allow(clippy::mut_from_ref)] // Intentional: exclusivity comes from the claim
    pub unsafe fn get_entry_mut(&self, sequence: i64) -> &mut T {
        self.ring.get_entry_mut(sequence)
    }

    /// Publish a single claimed sequence.
    #[inline]
    pub fn publish(&self, sequence: i64) {
        self.ring.publish(sequence, sequence);
    }

    /// Publish the claimed batch `lo..=hi`.
    ///
    /// With multiple producers this waits until every lower sequence has been
    /// published, so the cursor never skips a slot.
    #[inline]
    pub fn publish_range(&self, lo: i64, hi: i64) {
        debug_assert!(lo <= hi, "publish_range: lo {} > hi {}", lo, hi);
        self.ring.publish(lo, hi);
    }

    /// Claim one slot and hand it out behind a guard that publishes on drop.
    pub fn next_entry(&self) -> Claim<'_, T> {
        let sequence = self.claim_next();
        Claim {
            producer: self,
            sequence,
        }
    }

    /// Claim, write in place through `update`, publish. Returns the sequence.
    #[inline]
    pub fn publish_with<F>(&self, update: F) -> i64
    where
        F: FnOnce(&mut T, i64),
    {
        let seq = self.claim_next();
        // SAFETY: seq was claimed above and is published right after
        update(unsafe { self.ring.get_entry_mut(seq) }, seq);
        self.publish(seq);
        seq
    }

    /// Non-blocking `publish_with`; `None` if the ring is full.
    #[inline]
    pub fn try_publish_with<F>(&self, update: F) -> Option<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        let seq = self.try_claim(1)?;
        // SAFETY: seq was claimed above and is published right after
        update(unsafe { self.ring.get_entry_mut(seq) }, seq);
        self.publish(seq);
        Some(seq)
    }

    /// Claim `count` slots, fill each with `update(slot, sequence)` and
    /// publish them together. Returns the highest sequence.
    pub fn publish_batch_with<F>(&self, count: usize, mut update: F) -> i64
    where
        F: FnMut(&mut T, i64),
    {
        let hi = self.claim(count);
        let lo = hi - count as i64 + 1;
        for seq in lo..=hi {
            // SAFETY: lo..=hi was claimed above and is unpublished
            update(unsafe { self.ring.get_entry_mut(seq) }, seq);
        }
        self.publish_range(lo, hi);
        hi
    }

    #[inline]
    pub fn cursor(&self) -> i64 {
        self.ring.cursor()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Slots that can be claimed without waiting on a consumer.
    pub fn remaining_capacity(&self) -> i64 {
        self.ring.remaining_capacity(&self.gating)
    }

    pub fn gating_sequences(&self) -> &[Arc<Sequence>] {
        &self.gating
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }
}

impl<T: RingBufferEntry> fmt::Debug for ProducerBarrier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerBarrier")
            .field("cursor", &self.cursor())
            .field("gating", &self.gating.len())
            .finish()
    }
}

/// A claimed, unpublished slot. Publishes when dropped.
///
/// With multiple producers, a thread holding several claims must release them
/// in sequence order: a later claim waits for every earlier one to publish.
pub struct Claim<'a, T: RingBufferEntry> {
    producer: &'a ProducerBarrier<T>,
    sequence: i64,
}

impl<T: RingBufferEntry> Claim<'_, T> {
    #[inline]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Publish now instead of at end of scope.
    pub fn publish(self) {}
}

impl<T: RingBufferEntry> Deref for Claim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard owns the claim on this sequence until drop
        unsafe { self.producer.ring.get_entry(self.sequence) }
    }
}

impl<T: RingBufferEntry> DerefMut for Claim<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above; &mut self keeps the reference unique
        unsafe { self.producer.ring.get_entry_mut(self.sequence) }
    }
}

impl<T: RingBufferEntry> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        self.producer.publish(self.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{RingBufferConfig, ValueSlot};
    use std::thread;
    use std::time::Duration;

    type Slot = ValueSlot<String>;

    fn ring(size: usize, producer_type: ProducerType) -> Arc<RingBuffer<Slot>> {
        let config = RingBufferConfig::new(size)
            .unwrap()
            .with_producer_type(producer_type);
        Arc::new(RingBuffer::new(config).unwrap())
    }

    #[test]
    fn test_claim_guard_publishes_on_drop() {
        let ring = ring(4, ProducerType::Single);
        let producer = ring.producer_barrier(&[]).unwrap();
        {
            let mut claim = producer.next_entry();
            assert_eq!(claim.sequence(), 0);
            claim.value = "A".to_string();
            assert_eq!(producer.cursor(), -1);
        }
        assert_eq!(producer.cursor(), 0);
        assert_eq!(unsafe { ring.get_entry(0).value.as_str() }, "A");
    }

    #[test]
    fn test_publish_batch_with() {
        let ring = ring(8, ProducerType::Single);
        let producer = ring.producer_barrier(&[]).unwrap();
        let hi = producer.publish_batch_with(3, |slot, seq| slot.value = format!("m{}", seq));
        assert_eq!(hi, 2);
        assert_eq!(producer.cursor(), 2);
        assert_eq!(unsafe { ring.get_entry(2).value.as_str() }, "m2");
    }

    #[test]
    fn test_try_publish_on_full_ring() {
        let ring = ring(2, ProducerType::Single);
        let consumer = Arc::new(Sequence::default());
        let producer = ring.producer_barrier(&[consumer.clone()]).unwrap();

        assert_eq!(producer.try_publish_with(|s, _| s.value = "a".into()), Some(0));
        assert_eq!(producer.try_publish_with(|s, _| s.value = "b".into()), Some(1));
        assert_eq!(producer.remaining_capacity(), 0);
        assert_eq!(producer.try_publish_with(|s, _| s.value = "c".into()), None);

        consumer.set(0);
        assert_eq!(producer.remaining_capacity(), 1);
        assert_eq!(producer.try_publish_with(|s, _| s.value = "c".into()), Some(2));
    }

    #[test]
    fn test_try_clone_requires_multi() {
        let single = ring(4, ProducerType::Single);
        assert!(single.producer_barrier(&[]).unwrap().try_clone().is_err());

        let multi = ring(4, ProducerType::Multi);
        assert!(multi.producer_barrier(&[]).unwrap().try_clone().is_ok());
    }

    #[test]
    fn test_out_of_order_publish_keeps_cursor_contiguous() {
        let ring = ring(16, ProducerType::Multi);
        let p1 = ring.producer_barrier(&[]).unwrap();
        let p2 = p1.try_clone().unwrap();

        let first = p1.claim_next();
        let second = p2.claim_next();
        assert_eq!((first, second), (0, 1));

        let late = thread::spawn(move || {
            unsafe { p2.get_entry_mut(second).value = "second".into() };
            p2.publish(second);
        });

        thread::sleep(Duration::from_millis(20));
        assert_eq!(p1.cursor(), -1);

        unsafe { p1.get_entry_mut(first).value = "first".into() };
        p1.publish(first);
        late.join().unwrap();
        assert_eq!(p1.cursor(), 1);
    }
}
