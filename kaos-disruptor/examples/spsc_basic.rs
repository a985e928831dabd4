//! Simple SPSC Example
//!
//! One producer, one consumer thread, sum verified at the end.
//!
//! Run: RUST_LOG=debug cargo run --release --example spsc_basic

use kaos_disruptor::{ConsumerBuilder, RingBuffer, RingBufferConfig, Slot8, WaitStrategy};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const RING_SIZE: usize = 1024 * 64;
const MESSAGE_COUNT: u64 = 1_000_000;
const BATCH_SIZE: usize = 1024;

struct Summer {
    received: u64,
    sum: u64,
}

impl kaos_disruptor::EventHandler<Slot8> for Summer {
    fn on_event(&mut self, event: &Slot8, _sequence: i64, _end_of_batch: bool) {
        self.sum += event.value;
        self.received += 1;
    }
}

fn main() -> kaos_disruptor::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("\n=== Simple SPSC Example ===\n");

    let config = RingBufferConfig::new(RING_SIZE)?.with_wait_strategy(WaitStrategy::yielding());
    let ring = Arc::new(RingBuffer::<Slot8>::new(config)?);

    let consumer = ConsumerBuilder::new()
        .with_barrier(ring.consumer_barrier(&[]))
        .with_handler(Summer { received: 0, sum: 0 })
        .with_name("summer")
        .spawn()?;
    let producer = ring.producer_barrier(&[consumer.sequence()])?;

    let start = std::time::Instant::now();
    let mut sent = 0u64;
    while sent < MESSAGE_COUNT {
        let batch = ((MESSAGE_COUNT - sent) as usize).min(BATCH_SIZE);
        producer.publish_batch_with(batch, |slot, seq| slot.value = seq as u64 + 1);
        sent += batch as u64;
    }
    println!("Producer: sent {} messages", sent);

    let seq = consumer.sequence();
    while seq.get() < MESSAGE_COUNT as i64 - 1 {
        std::thread::yield_now();
    }
    let duration = start.elapsed();
    consumer.halt();
    let summer = consumer.join()?;
    println!("Consumer: received {} messages, sum = {}", summer.received, summer.sum);

    // Verify
    let expected = (MESSAGE_COUNT * (MESSAGE_COUNT + 1)) / 2;
    assert_eq!(summer.sum, expected, "Sum mismatch!");

    let throughput = MESSAGE_COUNT as f64 / duration.as_secs_f64() / 1_000_000.0;
    println!("\nThroughput: {:.2}M msgs/sec", throughput);
    println!("Verified: sum = {} (expected {})", summer.sum, expected);
    Ok(())
}
