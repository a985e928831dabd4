//! Ready-made slot types.

use super::{RingBufferEntry, INITIAL_CURSOR_VALUE};

/// Max payload of a `MessageSlot`.
pub const MESSAGE_SLOT_CAPACITY: usize = 240;

/// 8-byte payload slot.
#[derive(Debug, Clone, Copy)]
pub struct Slot8 {
    sequence: i64,
    pub value: u64,
}

impl Default for Slot8 {
    fn default() -> Self {
        Self {
            sequence: INITIAL_CURSOR_VALUE,
            value: 0,
        }
    }
}

impl RingBufferEntry for Slot8 {
    #[inline]
    fn sequence(&self) -> i64 {
        self.sequence
    }
    #[inline]
    fn set_sequence(&mut self, seq: i64) {
        self.sequence = seq;
    }
    #[inline]
    fn reset(&mut self) {
        self.value = 0;
    }
}

/// Variable-length bytes, up to `MESSAGE_SLOT_CAPACITY`.
#[derive(Clone)]
pub struct MessageSlot {
    sequence: i64,
    len: usize,
    data: [u8; MESSAGE_SLOT_CAPACITY],
}

impl Default for MessageSlot {
    fn default() -> Self {
        Self {
            sequence: INITIAL_CURSOR_VALUE,
            len: 0,
            data: [0; MESSAGE_SLOT_CAPACITY],
        }
    }
}

impl MessageSlot {
    /// Copy `bytes` in, truncating at capacity. Returns bytes stored.
    pub fn set_data(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(MESSAGE_SLOT_CAPACITY);
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.len = len;
        len
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for MessageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSlot")
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .finish()
    }
}

impl RingBufferEntry for MessageSlot {
    #[inline]
    fn sequence(&self) -> i64 {
        self.sequence
    }
    #[inline]
    fn set_sequence(&mut self, seq: i64) {
        self.sequence = seq;
    }
    #[inline]
    fn reset(&mut self) {
        self.len = 0;
    }
}

/// Wraps any `Default` value as a slot. `reset` restores the default.
#[derive(Debug, Clone)]
pub struct ValueSlot<V> {
    sequence: i64,
    pub value: V,
}

impl<V: Default> Default for ValueSlot<V> {
    fn default() -> Self {
        Self {
            sequence: INITIAL_CURSOR_VALUE,
            value: V::default(),
        }
    }
}

impl<V: Default + Send + Sync + 'static> RingBufferEntry for ValueSlot<V> {
    #[inline]
    fn sequence(&self) -> i64 {
        self.sequence
    }
    #[inline]
    fn set_sequence(&mut self, seq: i64) {
        self.sequence = seq;
    }
    fn reset(&mut self) {
        self.value = V::default();
    }
}
