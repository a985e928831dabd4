//! Disruptor - wires a consumer dependency graph onto one ring buffer.
//!
//! ```rust,ignore
//! let mut disruptor = Disruptor::<Slot8>::new(RingBufferConfig::new(1024)?)?;
//! let journal = disruptor.handle_events_with(journal_handler);
//! let replicate = disruptor.handle_events_with(replicate_handler);
//! let apply = disruptor.handle_events_with(apply_handler);
//! disruptor.after(apply, journal)?;
//! disruptor.after(apply, replicate)?;
//!
//! let running = disruptor.start()?;
//! running.producer().publish_with(|slot, seq| slot.value = seq as u64);
//! running.shutdown()?;
//! ```

use std::sync::Arc;

use crossbeam_utils::Backoff;

use crate::affinity::CoreAffinity;
use crate::disruptor::consumer::{ConsumerBuilder, ConsumerThread, EventHandler};
use crate::disruptor::producer::ProducerBarrier;
use crate::disruptor::ring_buffer::RingBuffer;
use crate::disruptor::sequence::{minimum_sequence, Sequence};
use crate::disruptor::{RingBufferConfig, RingBufferEntry};
use crate::error::{DisruptorError, Result};

/// Handle to a consumer registered with a `Disruptor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(usize);

impl ConsumerId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct DynHandler<T: RingBufferEntry>(Box<dyn EventHandler<T>>);

impl<T: RingBufferEntry> EventHandler<T> for DynHandler<T> {
    #[inline]
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) {
        self.0.on_event(event, sequence, end_of_batch)
    }
    fn on_start(&mut self) {
        self.0.on_start()
    }
    fn on_shutdown(&mut self) {
        self.0.on_shutdown()
    }
    fn on_timeout(&mut self, sequence: i64) {
        self.0.on_timeout(sequence)
    }
}

struct Node<T: RingBufferEntry> {
    name: String,
    handler: DynHandler<T>,
    upstream: Vec<usize>,
    affinity: Option<CoreAffinity>,
}

pub struct Disruptor<T: RingBufferEntry> {
    ring: Arc<RingBuffer<T>>,
    nodes: Vec<Node<T>>,
}

impl<T: RingBufferEntry> Disruptor<T> {
    pub fn new(config: RingBufferConfig) -> Result<Self> {
        Ok(Self {
            ring: Arc::new(RingBuffer::new(config)?),
            nodes: Vec::new(),
        })
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }

    /// Register a consumer. Without `after` edges it reads straight off the cursor.
    pub fn handle_events_with<H>(&mut self, handler: H) -> ConsumerId
    where
        H: EventHandler<T> + 'static,
    {
        let name = format!("consumer-{}", self.nodes.len());
        self.handle_events_named(name, handler)
    }

    /// As `handle_events_with`; `name` also names the consumer thread.
    pub fn handle_events_named<H>(&mut self, name: impl Into<String>, handler: H) -> ConsumerId
    where
        H: EventHandler<T> + 'static,
    {
        self.nodes.push(Node {
            name: name.into(),
            handler: DynHandler(Box::new(handler)),
            upstream: Vec::new(),
            affinity: None,
        });
        ConsumerId(self.nodes.len() - 1)
    }

    /// `downstream` only sees a slot once `upstream` has processed it.
    pub fn after(&mut self, downstream: ConsumerId, upstream: ConsumerId) -> Result<()> {
        self.check_id(downstream)?;
        self.check_id(upstream)?;
        if downstream == upstream {
            return Err(DisruptorError::config("a consumer cannot depend on itself"));
        }
        let node = &mut self.nodes[downstream.0];
        if !node.upstream.contains(&upstream.0) {
            node.upstream.push(upstream.0);
        }
        Ok(())
    }

    pub fn pin(&mut self, id: ConsumerId, affinity: CoreAffinity) -> Result<()> {
        self.check_id(id)?;
        self.nodes[id.0].affinity = Some(affinity);
        Ok(())
    }

    /// Validate the graph, spawn every consumer and create the producer,
    /// gated on the consumers nothing else depends on.
    pub fn start(self) -> Result<RunningDisruptor<T>> {
        if self.nodes.is_empty() {
            return Err(DisruptorError::config("at least one consumer is required"));
        }
        let order = topological_order(&self.nodes)?;

        let mut is_upstream = vec![false; self.nodes.len()];
        for node in &self.nodes {
            for &up in &node.upstream {
                is_upstream[up] = true;
            }
        }

        let mut slots: Vec<Option<Node<T>>> = self.nodes.into_iter().map(Some).collect();
        let mut sequences: Vec<Option<Arc<Sequence>>> = vec![None; slots.len()];
        let mut threads = Vec::with_capacity(slots.len());

        for idx in order {
            let Some(node) = slots[idx].take() else {
                continue;
            };
            // upstream nodes come earlier in topological order
            let dependents: Vec<Arc<Sequence>> = node
                .upstream
                .iter()
                .filter_map(|&up| sequences[up].clone())
                .collect();

            let mut builder = ConsumerBuilder::new()
                .with_barrier(self.ring.consumer_barrier(&dependents))
                .with_handler(node.handler)
                .with_name(node.name);
            if let Some(affinity) = node.affinity {
                builder = builder.with_affinity(affinity);
            }

            match builder.spawn() {
                Ok(thread) => {
                    sequences[idx] = Some(thread.sequence());
                    threads.push((ConsumerId(idx), thread));
                }
                Err(e) => {
                    stop_all(threads);
                    return Err(e);
                }
            }
        }

        let gating: Vec<Arc<Sequence>> = sequences
            .iter()
            .enumerate()
            .filter(|(idx, _)| !is_upstream[*idx])
            .filter_map(|(_, seq)| seq.clone())
            .collect();
        let producer = match self.ring.producer_barrier(&gating) {
            Ok(producer) => producer,
            Err(e) => {
                stop_all(threads);
                return Err(e);
            }
        };

        trace_info!(
            consumers = threads.len(),
            gating = gating.len(),
            capacity = self.ring.capacity(),
            "disruptor started"
        );

        Ok(RunningDisruptor {
            ring: self.ring,
            producer,
            threads,
        })
    }

    fn check_id(&self, id: ConsumerId) -> Result<()> {
        if id.0 >= self.nodes.len() {
            return Err(DisruptorError::config(format!(
                "unknown consumer id {}",
                id.0
            )));
        }
        Ok(())
    }
}

type Spawned<T> = Vec<(ConsumerId, ConsumerThread<T, DynHandler<T>>)>;

// Unwinds a partially started graph
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
fn stop_all<T: RingBufferEntry>(threads: Spawned<T>) {
    for (_, thread) in &threads {
        thread.halt();
    }
    for (_, thread) in threads {
        if let Err(err) = thread.join() {
            trace_warn!(error = %err, "consumer failed while aborting start");
        }
    }
}

// Kahn's algorithm over upstream edges
fn topological_order<T: RingBufferEntry>(nodes: &[Node<T>]) -> Result<Vec<usize>> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.upstream.len()).collect();
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (idx, node) in nodes.iter().enumerate() {
        for &up in &node.upstream {
            downstream[up].push(idx);
        }
    }

    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    ready.reverse();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(idx) = ready.pop() {
        order.push(idx);
        for &down in &downstream[idx] {
            in_degree[down] -= 1;
            if in_degree[down] == 0 {
                ready.push(down);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, n)| n.name.as_str())
            .collect();
        trace_warn!(?stuck, "consumer dependency cycle");
        return Err(DisruptorError::config(format!(
            "consumer dependency graph has a cycle through {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// A started `Disruptor`: the producer plus the consumer threads.
pub struct RunningDisruptor<T: RingBufferEntry> {
    ring: Arc<RingBuffer<T>>,
    producer: ProducerBarrier<T>,
    threads: Spawned<T>,
}

impl<T: RingBufferEntry> RunningDisruptor<T> {
    /// In multi-producer mode, `producer().try_clone()` for more producers.
    pub fn producer(&self) -> &ProducerBarrier<T> {
        &self.producer
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }

    pub fn consumer_sequence(&self, id: ConsumerId) -> Option<Arc<Sequence>> {
        self.threads
            .iter()
            .find(|(cid, _)| *cid == id)
            .map(|(_, thread)| thread.sequence())
    }

    /// Alert every consumer barrier. Consumers stop after their current batch.
    pub fn halt(&self) {
        trace_info!(cursor = self.ring.cursor(), "disruptor halting");
        for (_, thread) in &self.threads {
            thread.halt();
        }
    }

    /// Wait for every consumer thread to exit. Returns the first failure.
    pub fn join(self) -> Result<()> {
        let mut first_err = None;
        for (_, thread) in self.threads {
            if let Err(e) = thread.join() {
                trace_warn!(error = %e, "consumer exited with error");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Let every consumer catch up with the cursor, then halt and join.
    pub fn shutdown(self) -> Result<()> {
        let sequences: Vec<Arc<Sequence>> =
            self.threads.iter().map(|(_, t)| t.sequence()).collect();
        let backoff = Backoff::new();
        loop {
            let cursor = self.ring.cursor();
            if minimum_sequence(&sequences, cursor) >= cursor {
                break;
            }
            // a consumer that already exited will never catch up
            if self.threads.iter().any(|(_, t)| t.is_finished()) {
                break;
            }
            backoff.snooze();
        }
        self.halt();
        self.join()
    }
}
