//! Claim strategies: how producers reserve sequences and serialise publication.
//!
//! Both variants refuse to hand out sequence `s` until every gating consumer
//! has passed `s - capacity`, so a claimed slot never aliases unread data.

use std::sync::Arc;

use crossbeam_utils::Backoff;

use crate::disruptor::sequence::{minimum_sequence, Sequence, INITIAL_CURSOR_VALUE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerType {
    /// One producer thread; claims are plain increments.
    #[default]
    Single,
    /// Any number of producer threads; claims use fetch-add.
    Multi,
}

#[derive(Debug)]
pub(crate) struct ClaimStrategy {
    producer_type: ProducerType,
    /// Highest claimed sequence.
    claimed: Sequence,
    /// Last observed minimum of the gating set. A hint, so relaxed.
    gate_cache: Sequence,
}

impl ClaimStrategy {
    pub(crate) fn new(producer_type: ProducerType) -> Self {
        Self {
            producer_type,
            claimed: Sequence::new(INITIAL_CURSOR_VALUE),
            gate_cache: Sequence::new(INITIAL_CURSOR_VALUE),
        }
    }

    pub(crate) fn producer_type(&self) -> ProducerType {
        self.producer_type
    }

    pub(crate) fn claimed(&self) -> i64 {
        self.claimed.get()
    }

    /// Claim `n` sequences, blocking until the ring has room.
    /// Returns the highest sequence of the claimed range.
    pub(crate) fn claim(&self, n: i64, capacity: i64, gating: &[Arc<Sequence>]) -> i64 {
        let hi = match self.producer_type {
            ProducerType::Single => {
                let hi = self.claimed.relaxed() + n;
                self.claimed.set_relaxed(hi);
                hi
            }
            ProducerType::Multi => self.claimed.add_and_get(n),
        };
        self.wait_for_capacity(hi, capacity, gating);
        hi
    }

    /// Claim `n` sequences without blocking. Leaves no trace on failure.
    pub(crate) fn try_claim(&self, n: i64, capacity: i64, gating: &[Arc<Sequence>]) -> Option<i64> {
        match self.producer_type {
            ProducerType::Single => {
                let current = self.claimed.relaxed();
                let hi = current + n;
                if !self.has_capacity(current, hi, capacity, gating) {
                    return None;
                }
                self.claimed.set_relaxed(hi);
                Some(hi)
            }
            ProducerType::Multi => loop {
                let current = self.claimed.get();
                let hi = current + n;
                if !self.has_capacity(current, hi, capacity, gating) {
                    return None;
                }
                if self.claimed.compare_and_set(current, hi) {
                    return Some(hi);
                }
                std::hint::spin_loop();
            },
        }
    }

    /// Make `lo..=hi` visible on `cursor`.
    ///
    /// With multiple producers the cursor only moves contiguously: a range is
    /// published once the cursor has reached `lo - 1`.
    pub(crate) fn publish(&self, cursor: &Sequence, lo: i64, hi: i64) {
        if self.producer_type == ProducerType::Multi {
            let expected = lo - 1;
            let backoff = Backoff::new();
            while cursor.get() != expected {
                backoff.snooze();
            }
        }
        cursor.set(hi);
    }

    pub(crate) fn remaining_capacity(&self, capacity: i64, gating: &[Arc<Sequence>]) -> i64 {
        let claimed = self.claimed.get();
        let consumed = minimum_sequence(gating, claimed);
        capacity - (claimed - consumed)
    }

    fn wait_for_capacity(&self, hi: i64, capacity: i64, gating: &[Arc<Sequence>]) {
        let wrap_point = hi - capacity;
        if wrap_point <= self.gate_cache.relaxed() {
            return;
        }

        let backoff = Backoff::new();
        let mut min = minimum_sequence(gating, hi);
        while wrap_point > min {
            backoff.snooze();
            min = minimum_sequence(gating, hi);
        }
        self.gate_cache.set_relaxed(min);
    }

    fn has_capacity(&self, current: i64, hi: i64, capacity: i64, gating: &[Arc<Sequence>]) -> bool {
        let wrap_point = hi - capacity;
        if wrap_point <= self.gate_cache.relaxed() {
            return true;
        }
        let min = minimum_sequence(gating, current);
        self.gate_cache.set_relaxed(min);
        wrap_point <= min
    }
}
