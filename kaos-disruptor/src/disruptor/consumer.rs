//! Consumer loop: wait on a barrier, hand slots to an `EventHandler`, advance.
//!
//! - `BatchConsumer` - the loop itself, `Idle -> Running -> Halted`
//! - `ConsumerControl` - cloneable handle to halt a running loop
//! - `ConsumerBuilder` - validated construction, optional dedicated thread
//! - `ConsumerThread` - a spawned loop that can be halted and joined

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::affinity::CoreAffinity;
use crate::disruptor::barrier::ConsumerBarrier;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::RingBufferEntry;
use crate::error::{DisruptorError, Result};

const DEFAULT_MAX_BATCH_SIZE: usize = 2048;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const HALTED: u8 = 2;

pub trait EventHandler<T: RingBufferEntry>: Send {
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool);

    fn on_start(&mut self) {}

    fn on_shutdown(&mut self) {}

    /// Called when a wait with a configured timeout expires without progress.
    fn on_timeout(&mut self, _sequence: i64) {}
}

impl<T, F> EventHandler<T> for F
where
    T: RingBufferEntry,
    F: FnMut(&T, i64, bool) + Send,
{
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) {
        self(event, sequence, end_of_batch)
    }
}

/// What the loop does when its wait is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    StopOnInterrupt,
    RetryOnInterrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    Halted,
}

impl ConsumerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IDLE => Self::Idle,
            RUNNING => Self::Running,
            _ => Self::Halted,
        }
    }
}

/// Shareable handle for stopping a consumer from another thread.
pub struct ConsumerControl<T: RingBufferEntry> {
    state: Arc<AtomicU8>,
    barrier: ConsumerBarrier<T>,
    sequence: Arc<Sequence>,
}

impl<T: RingBufferEntry> Clone for ConsumerControl<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            barrier: self.barrier.clone(),
            sequence: Arc::clone(&self.sequence),
        }
    }
}

impl<T: RingBufferEntry> ConsumerControl<T> {
    /// Move to `Halted` and alert the barrier. A halted consumer never restarts.
    pub fn halt(&self) {
        self.state.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    pub fn barrier(&self) -> &ConsumerBarrier<T> {
        &self.barrier
    }
}

pub struct BatchConsumer<T: RingBufferEntry, H: EventHandler<T>> {
    name: String,
    barrier: ConsumerBarrier<T>,
    handler: H,
    sequence: Arc<Sequence>,
    state: Arc<AtomicU8>,
    max_batch_size: usize,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
}

impl<T: RingBufferEntry, H: EventHandler<T>> BatchConsumer<T, H> {
    pub fn new(barrier: ConsumerBarrier<T>, handler: H) -> Self {
        Self {
            name: "consumer".to_string(),
            barrier,
            handler,
            sequence: Arc::new(Sequence::default()),
            state: Arc::new(AtomicU8::new(IDLE)),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// This consumer's progress. Add it to producer gating sets and to the
    /// barriers of downstream consumers.
    pub fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    pub fn control(&self) -> ConsumerControl<T> {
        ConsumerControl {
            state: Arc::clone(&self.state),
            barrier: self.barrier.clone(),
            sequence: Arc::clone(&self.sequence),
        }
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn halt(&self) {
        self.control().halt();
    }

    /// Run until alerted (or interrupted, per the retry policy).
    ///
    /// Fails with `IllegalState` unless the consumer is still `Idle`.
    pub fn run(&mut self) -> Result<()> {
        self.mark_running()?;
        self.run_loop()
    }

    fn mark_running(&self) -> Result<()> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DisruptorError::IllegalState("consumer already started or halted"))
    }

    // Caller has already moved the state to RUNNING. A halt() that lands
    // after that leaves the barrier alerted, so the first wait exits cleanly.
    fn run_loop(&mut self) -> Result<()> {
        trace_debug!(consumer = %self.name, "consumer started");
        self.handler.on_start();
        let result = self.process_events();
        self.handler.on_shutdown();
        self.state.store(HALTED, Ordering::Release);
        trace_debug!(
            consumer = %self.name,
            sequence = self.sequence.get(),
            "consumer halted"
        );
        result
    }

    fn process_events(&mut self) -> Result<()> {
        let mut next = self.sequence.get() + 1;
        loop {
            let waited = match self.timeout {
                Some(timeout) => self.barrier.wait_for_timeout(next, timeout),
                None => self.barrier.wait_for(next),
            };

            match waited {
                Ok(available) if available >= next => {
                    let end = available.min(next + self.max_batch_size as i64 - 1);
                    for seq in next..=end {
                        // SAFETY: seq <= available, and our sequence (still
                        // below seq) gates every producer and downstream consumer
                        let event = unsafe { self.barrier.get_entry(seq) };
                        self.handler.on_event(event, seq, seq == end);
                    }
                    self.sequence.set(end);
                    next = end + 1;
                }
                Ok(_) => self.handler.on_timeout(self.sequence.get()),
                Err(DisruptorError::Alert) => return Ok(()),
                Err(DisruptorError::Interrupted) => match self.retry_policy {
                    RetryPolicy::RetryOnInterrupt => {
                        trace_debug!(consumer = %self.name, "interrupted, retrying");
                    }
                    RetryPolicy::StopOnInterrupt => {
                        trace_warn!(consumer = %self.name, next, "interrupted, stopping");
                        return Ok(());
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: RingBufferEntry, H: EventHandler<T>> fmt::Debug for BatchConsumer<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConsumer")
            .field("name", &self.name)
            .field("sequence", &self.sequence.get())
            .field("state", &self.state())
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

pub struct ConsumerBuilder<T: RingBufferEntry, H: EventHandler<T>> {
    barrier: Option<ConsumerBarrier<T>>,
    handler: Option<H>,
    name: Option<String>,
    max_batch_size: usize,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    affinity: Option<CoreAffinity>,
}

impl<T: RingBufferEntry, H: EventHandler<T>> Default for ConsumerBuilder<T, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RingBufferEntry, H: EventHandler<T>> ConsumerBuilder<T, H> {
    pub fn new() -> Self {
        Self {
            barrier: None,
            handler: None,
            name: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeout: None,
            retry_policy: RetryPolicy::default(),
            affinity: None,
        }
    }
    pub fn with_barrier(mut self, barrier: ConsumerBarrier<T>) -> Self {
        self.barrier = Some(barrier);
        self
    }
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
    /// Wake up at least every `timeout` and call `EventHandler::on_timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
    pub fn with_affinity(mut self, affinity: CoreAffinity) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn build(self) -> Result<BatchConsumer<T, H>> {
        Ok(self.build_parts()?.0)
    }

    /// Build and run the consumer on a dedicated, named thread.
    pub fn spawn(self) -> Result<ConsumerThread<T, H>>
    where
        H: 'static,
    {
        let (mut consumer, affinity) = self.build_parts()?;
        let name = consumer.name.clone();
        let control = consumer.control();
        // Running before the thread exists, so an early halt() is a clean stop
        consumer.mark_running()?;

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Some(affinity) = affinity {
                    if let Err(e) = affinity.apply() {
                        trace_warn!(consumer = %consumer.name, ?affinity, error = %e, "pinning failed");
                    }
                }
                let result = consumer.run_loop();
                (consumer.into_handler(), result)
            })
            .map_err(|e| {
                control.state.store(HALTED, Ordering::Release);
                DisruptorError::Spawn(e.to_string())
            })?;

        Ok(ConsumerThread {
            name,
            control,
            handle,
        })
    }

    fn build_parts(self) -> Result<(BatchConsumer<T, H>, Option<CoreAffinity>)> {
        let barrier = self
            .barrier
            .ok_or_else(|| DisruptorError::config("Consumer barrier required"))?;
        let handler = self
            .handler
            .ok_or_else(|| DisruptorError::config("Event handler required"))?;
        if self.max_batch_size == 0 {
            return Err(DisruptorError::config(
                "Max batch size must be greater than 0",
            ));
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(DisruptorError::config("Timeout must be greater than 0"));
            }
            if Instant::now().checked_add(timeout).is_none() {
                return Err(DisruptorError::config("Timeout is too large"));
            }
        }

        let mut consumer = BatchConsumer::new(barrier, handler);
        if let Some(name) = self.name {
            consumer.name = name;
        }
        consumer.max_batch_size = self.max_batch_size;
        consumer.timeout = self.timeout;
        consumer.retry_policy = self.retry_policy;
        Ok((consumer, self.affinity))
    }
}

/// A consumer loop running on its own thread.
pub struct ConsumerThread<T: RingBufferEntry, H: EventHandler<T>> {
    name: String,
    control: ConsumerControl<T>,
    handle: JoinHandle<(H, Result<()>)>,
}

impl<T: RingBufferEntry, H: EventHandler<T>> ConsumerThread<T, H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn control(&self) -> &ConsumerControl<T> {
        &self.control
    }

    pub fn sequence(&self) -> Arc<Sequence> {
        self.control.sequence()
    }

    pub fn halt(&self) {
        self.control.halt();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit and get the handler back.
    pub fn join(self) -> Result<H> {
        let (handler, result) = self
            .handle
            .join()
            .map_err(|_| DisruptorError::ConsumerPanicked(self.name.clone()))?;
        result.map(|()| handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{
        ProducerType, RingBuffer, RingBufferConfig, ValueSlot, WaitStrategy,
    };
    use std::sync::Mutex;
    use std::thread;

    type Slot = ValueSlot<u64>;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(i64, u64, bool)>,
        started: bool,
        stopped: bool,
        timeouts: usize,
    }

    impl EventHandler<Slot> for Recorder {
        fn on_event(&mut self, event: &Slot, sequence: i64, end_of_batch: bool) {
            self.seen.push((sequence, event.value, end_of_batch));
        }
        fn on_start(&mut self) {
            self.started = true;
        }
        fn on_shutdown(&mut self) {
            self.stopped = true;
        }
        fn on_timeout(&mut self, _sequence: i64) {
            self.timeouts += 1;
        }
    }

    fn ring(wait: WaitStrategy) -> Arc<RingBuffer<Slot>> {
        let config = RingBufferConfig::new(64)
            .unwrap()
            .with_producer_type(ProducerType::Multi)
            .with_wait_strategy(wait);
        Arc::new(RingBuffer::new(config).unwrap())
    }

    fn wait_until<F: Fn() -> bool>(cond: F) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(std::time::Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_processes_in_order_and_halts() {
        let ring = ring(WaitStrategy::blocking());
        let thread = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .with_name("recorder")
            .spawn()
            .unwrap();
        let producer = ring.producer_barrier(&[thread.sequence()]).unwrap();

        for i in 0..10u64 {
            producer.publish_with(|slot, _| slot.value = i * 2);
        }

        let seq = thread.sequence();
        wait_until(|| seq.get() == 9);
        thread.halt();
        assert_eq!(thread.control().state(), ConsumerState::Halted);

        let recorder = thread.join().unwrap();
        assert!(recorder.started && recorder.stopped);
        let values: Vec<u64> = recorder.seen.iter().map(|(_, v, _)| *v).collect();
        assert_eq!(values, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        let seqs: Vec<i64> = recorder.seen.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
        assert!(recorder.seen.last().unwrap().2);
    }

    #[test]
    fn test_batches_are_capped() {
        let ring = ring(WaitStrategy::busy_spin());
        let producer = ring.producer_barrier(&[]).unwrap();
        for i in 0..5u64 {
            producer.publish_with(|slot, _| slot.value = i);
        }

        let mut consumer = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .with_max_batch_size(2)
            .build()
            .unwrap();
        let control = consumer.control();
        let seq = consumer.sequence();

        let runner = thread::spawn(move || {
            consumer.run().unwrap();
            consumer.into_handler()
        });
        wait_until(|| seq.get() == 4);
        control.halt();

        let recorder = runner.join().unwrap();
        let ends: Vec<bool> = recorder.seen.iter().map(|(_, _, end)| *end).collect();
        assert_eq!(ends, vec![false, true, false, true, true]);
    }

    #[test]
    fn test_halted_consumer_cannot_restart() {
        let ring = ring(WaitStrategy::yielding());
        let mut consumer = BatchConsumer::new(ring.consumer_barrier(&[]), Recorder::default());
        assert_eq!(consumer.state(), ConsumerState::Idle);

        consumer.halt();
        assert_eq!(consumer.state(), ConsumerState::Halted);
        assert_eq!(
            consumer.run(),
            Err(DisruptorError::IllegalState("consumer already started or halted"))
        );
        assert!(!consumer.handler().started);
    }

    #[test]
    fn test_interrupt_stops_by_default() {
        let ring = ring(WaitStrategy::blocking());
        let thread = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .spawn()
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        thread.control().barrier().interrupt();
        let recorder = thread.join().unwrap();
        assert!(recorder.stopped);
    }

    #[test]
    fn test_interrupt_with_retry_keeps_running() {
        let ring = ring(WaitStrategy::blocking());
        let thread = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .with_retry_policy(RetryPolicy::RetryOnInterrupt)
            .spawn()
            .unwrap();
        let producer = ring.producer_barrier(&[thread.sequence()]).unwrap();

        thread::sleep(Duration::from_millis(20));
        thread.control().barrier().interrupt();
        thread::sleep(Duration::from_millis(20));
        assert!(!thread.is_finished());

        producer.publish_with(|slot, _| slot.value = 7);
        let seq = thread.sequence();
        wait_until(|| seq.get() == 0);
        thread.halt();
        assert_eq!(thread.join().unwrap().seen, vec![(0, 7, true)]);
    }

    #[test]
    fn test_timeout_calls_handler() {
        let ring = ring(WaitStrategy::sleeping());
        let timeouts = Arc::new(Mutex::new(0usize));

        struct Counting(Arc<Mutex<usize>>);
        impl EventHandler<Slot> for Counting {
            fn on_event(&mut self, _: &Slot, _: i64, _: bool) {}
            fn on_timeout(&mut self, sequence: i64) {
                assert_eq!(sequence, -1);
                *self.0.lock().unwrap() += 1;
            }
        }

        let thread = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Counting(timeouts.clone()))
            .with_timeout(Duration::from_millis(2))
            .spawn()
            .unwrap();

        wait_until(|| *timeouts.lock().unwrap() >= 2);
        thread.halt();
        thread.join().unwrap();
    }

    #[test]
    fn test_closure_handler() {
        let ring = ring(WaitStrategy::yielding());
        let producer = ring.producer_barrier(&[]).unwrap();
        producer.publish_batch_with(3, |slot, seq| slot.value = seq as u64 + 100);

        let total = Arc::new(Mutex::new(0u64));
        let sink = total.clone();
        let thread = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(move |slot: &Slot, _seq: i64, _end: bool| {
                *sink.lock().unwrap() += slot.value;
            })
            .spawn()
            .unwrap();

        let seq = thread.sequence();
        wait_until(|| seq.get() == 2);
        thread.halt();
        thread.join().unwrap();
        assert_eq!(*total.lock().unwrap(), 303);
    }

    #[test]
    fn test_handler_panic_surfaces_on_join() {
        let ring = ring(WaitStrategy::yielding());
        let thread = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(|slot: &Slot, _: i64, _: bool| assert_eq!(slot.value, 0, "bad event"))
            .with_name("fragile")
            .spawn()
            .unwrap();
        let producer = ring.producer_barrier(&[thread.sequence()]).unwrap();
        producer.publish_with(|slot, _| slot.value = 1);

        assert_eq!(
            thread.join().err(),
            Some(DisruptorError::ConsumerPanicked("fragile".to_string()))
        );
    }

    #[test]
    fn test_halt_right_after_spawn_stops_cleanly() {
        let ring = ring(WaitStrategy::blocking());
        for _ in 0..100 {
            let thread = ConsumerBuilder::new()
                .with_barrier(ring.consumer_barrier(&[]))
                .with_handler(Recorder::default())
                .spawn()
                .unwrap();
            assert_eq!(thread.control().state(), ConsumerState::Running);
            thread.halt();

            let recorder = thread.join().unwrap();
            assert!(recorder.started && recorder.stopped);
        }
    }

    #[test]
    fn test_spawned_consumer_cannot_run_again() {
        let ring = ring(WaitStrategy::yielding());
        let mut consumer = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .build()
            .unwrap();
        let control = consumer.control();
        let seq = consumer.sequence();
        let runner = thread::spawn(move || {
            consumer.run().unwrap();
            consumer
        });
        wait_until(|| control.state() == ConsumerState::Running);
        control.halt();

        let mut consumer = runner.join().unwrap();
        assert_eq!(seq.get(), -1);
        assert_eq!(
            consumer.run(),
            Err(DisruptorError::IllegalState("consumer already started or halted"))
        );
    }

    #[test]
    fn test_oversized_timeout_is_rejected() {
        let ring = ring(WaitStrategy::yielding());
        let built = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .with_timeout(Duration::MAX)
            .build();
        assert!(matches!(built, Err(DisruptorError::Config(_))));
    }

    #[test]
    fn test_builder_validation() {
        let ring = ring(WaitStrategy::yielding());
        let missing = ConsumerBuilder::<Slot, Recorder>::new().build();
        assert!(matches!(missing, Err(DisruptorError::Config(_))));

        let zero_batch = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .with_max_batch_size(0)
            .build();
        assert!(matches!(zero_batch, Err(DisruptorError::Config(_))));

        let zero_timeout = ConsumerBuilder::new()
            .with_barrier(ring.consumer_barrier(&[]))
            .with_handler(Recorder::default())
            .with_timeout(Duration::ZERO)
            .build();
        assert!(matches!(zero_timeout, Err(DisruptorError::Config(_))));
    }
}
