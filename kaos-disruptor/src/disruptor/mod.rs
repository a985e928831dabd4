//! Sequence-coordinated ring buffer (LMAX Disruptor pattern).
//!
//! - `RingBuffer<T>` - pre-allocated slots and the published cursor
//! - `ProducerBarrier<T>` - claim and publish, gated on consumer sequences
//! - `ConsumerBarrier<T>` - wait for available sequences, alert/interrupt
//! - `BatchConsumer<T, H>` - the consumer loop driving an `EventHandler`
//! - `Disruptor<T>` - wires a consumer graph and runs it on threads

mod alert;
mod barrier;
mod claim;
mod consumer;
mod graph;
mod producer;
mod ring_buffer;
mod sequence;
mod slots;
mod wait;

// Re-exports
pub use alert::WaitSignal;
pub use barrier::ConsumerBarrier;
pub use claim::ProducerType;
pub use consumer::{
    BatchConsumer, ConsumerBuilder, ConsumerControl, ConsumerState, ConsumerThread, EventHandler,
    RetryPolicy,
};
pub use graph::{ConsumerId, Disruptor, RunningDisruptor};
pub use producer::{Claim, ProducerBarrier};
pub use ring_buffer::RingBuffer;
pub use sequence::{minimum_sequence, Sequence, INITIAL_CURSOR_VALUE};
pub use slots::{MessageSlot, Slot8, ValueSlot, MESSAGE_SLOT_CAPACITY};
pub use wait::{BlockingWait, WaitStrategy};

use crate::error::{DisruptorError, Result};

/// Default ring buffer size (must be power of 2)
pub const DEFAULT_RING_BUFFER_SIZE: usize = 64 * 1024; // 64K slots

/// Trait for objects that can be stored in the ring buffer
pub trait RingBufferEntry: Default + Send + Sync + 'static {
    /// Sequence this slot was last claimed for
    fn sequence(&self) -> i64;

    /// Stamped by the ring buffer on every claim
    fn set_sequence(&mut self, seq: i64);

    /// Called before the slot is handed to a producer again
    fn reset(&mut self) {}
}

/// Configuration for ring buffer behavior
#[derive(Debug, Clone)]
pub struct RingBufferConfig {
    /// Size of the ring buffer (must be power of 2)
    pub size: usize,
    pub producer_type: ProducerType,
    pub wait_strategy: WaitStrategy,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_RING_BUFFER_SIZE,
            producer_type: ProducerType::default(),
            wait_strategy: WaitStrategy::default(),
        }
    }
}

impl RingBufferConfig {
    /// Create a new configuration with the specified size
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(DisruptorError::config(
                "Ring buffer size must be greater than 0",
            ));
        }
        if !size.is_power_of_two() {
            return Err(DisruptorError::config("Ring buffer size must be power of 2"));
        }

        Ok(Self {
            size,
            ..Default::default()
        })
    }

    pub fn with_producer_type(mut self, producer_type: ProducerType) -> Self {
        self.producer_type = producer_type;
        self
    }

    pub fn with_wait_strategy(mut self, wait_strategy: WaitStrategy) -> Self {
        self.wait_strategy = wait_strategy;
        self
    }
}
