//! Multi-producer Example
//!
//! Four producer threads share one multi-producer ring; two independent
//! consumers each see every message.
//!
//! Run: RUST_LOG=info cargo run --release --example mpmc_basic

use kaos_disruptor::{Disruptor, ProducerType, RingBufferConfig, ValueSlot, WaitStrategy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

const RING_SIZE: usize = 1024 * 16;
const PRODUCERS: u64 = 4;
const PER_PRODUCER: u64 = 250_000;

type Order = ValueSlot<(u64, u64)>; // (producer id, amount)

fn main() -> kaos_disruptor::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("\n=== Multi-Producer Example ===\n");

    let config = RingBufferConfig::new(RING_SIZE)?
        .with_producer_type(ProducerType::Multi)
        .with_wait_strategy(WaitStrategy::blocking());
    let mut disruptor = Disruptor::<Order>::new(config)?;

    let total = Arc::new(AtomicU64::new(0));
    let count = Arc::new(AtomicU64::new(0));

    let t = total.clone();
    disruptor.handle_events_named("ledger", move |order: &Order, _: i64, _: bool| {
        t.fetch_add(order.value.1, Ordering::Relaxed);
    });
    let c = count.clone();
    disruptor.handle_events_named("audit", move |_: &Order, _: i64, _: bool| {
        c.fetch_add(1, Ordering::Relaxed);
    });

    let running = disruptor.start()?;
    let start = std::time::Instant::now();

    thread::scope(|s| -> kaos_disruptor::Result<()> {
        for id in 0..PRODUCERS {
            let producer = running.producer().try_clone()?;
            s.spawn(move || {
                for amount in 1..=PER_PRODUCER {
                    producer.publish_with(|slot, _| slot.value = (id, amount));
                }
            });
        }
        Ok(())
    })?;

    running.shutdown()?;
    let duration = start.elapsed();

    let messages = PRODUCERS * PER_PRODUCER;
    let expected = PRODUCERS * PER_PRODUCER * (PER_PRODUCER + 1) / 2;
    assert_eq!(count.load(Ordering::Relaxed), messages);
    assert_eq!(total.load(Ordering::Relaxed), expected);

    let throughput = messages as f64 / duration.as_secs_f64() / 1_000_000.0;
    println!("Producers: {} x {} messages", PRODUCERS, PER_PRODUCER);
    println!("\nThroughput: {:.2}M msgs/sec", throughput);
    println!("Verified: total = {} (expected {})", total.load(Ordering::Relaxed), expected);
    Ok(())
}
