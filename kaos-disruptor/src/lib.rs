//! Kaos Disruptor - sequence-coordinated ring buffer
//!
//! Producers claim slots, write in place and publish by advancing the cursor.
//! Consumers wait on a barrier, process slots in order and advance their own
//! sequence, which in turn gates the producers and any downstream consumers.

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_info { ($($arg:tt)*) => { tracing::info!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_info { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => {} }

pub mod affinity;
pub mod disruptor;
pub mod error;

// Re-export main components
pub use disruptor::{
    BatchConsumer, BlockingWait, Claim, ConsumerBarrier, ConsumerBuilder, ConsumerControl,
    ConsumerId, ConsumerState, ConsumerThread, Disruptor, EventHandler, MessageSlot,
    ProducerBarrier, ProducerType, RetryPolicy, RingBuffer, RingBufferConfig, RingBufferEntry,
    RunningDisruptor, Sequence, Slot8, ValueSlot, WaitStrategy, INITIAL_CURSOR_VALUE,
};
pub use error::{DisruptorError, Result};
