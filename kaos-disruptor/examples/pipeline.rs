//! Pipeline Example
//!
//! parse -> {enrich, journal} -> apply. `apply` only sees a slot once both
//! `enrich` and `journal` have handled it.
//!
//! Run: RUST_LOG=debug cargo run --example pipeline

use kaos_disruptor::affinity::CoreAffinity;
use kaos_disruptor::{Disruptor, EventHandler, RingBufferConfig, ValueSlot, WaitStrategy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EVENTS: u64 = 10_000;

#[derive(Default)]
struct Trade {
    raw: u64,
    price: AtomicU64,
    fee: AtomicU64,
}

type Slot = ValueSlot<Trade>;

struct Apply {
    balance: Arc<Mutex<u64>>,
    applied: u64,
}

impl EventHandler<Slot> for Apply {
    fn on_event(&mut self, event: &Slot, _sequence: i64, _end_of_batch: bool) {
        let trade = &event.value;
        let net = trade.price.load(Ordering::Acquire) - trade.fee.load(Ordering::Acquire);
        if let Ok(mut balance) = self.balance.lock() {
            *balance += net;
        }
        self.applied += 1;
    }

    fn on_shutdown(&mut self) {
        tracing::info!(applied = self.applied, "apply stage done");
    }
}

fn main() -> kaos_disruptor::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("\n=== Pipeline Example ===\n");

    let wait =
        WaitStrategy::sleeping_with(200, Duration::from_micros(1), Duration::from_millis(1))?;
    let config = RingBufferConfig::new(1024)?.with_wait_strategy(wait);
    let mut disruptor = Disruptor::<Slot>::new(config)?;

    let parse = disruptor.handle_events_named("parse", |slot: &Slot, _: i64, _: bool| {
        slot.value.price.store(slot.value.raw * 100, Ordering::Release);
    });
    let enrich = disruptor.handle_events_named("enrich", |slot: &Slot, _: i64, _: bool| {
        let price = slot.value.price.load(Ordering::Acquire);
        slot.value.fee.store(price / 100, Ordering::Release);
    });
    let journal = disruptor.handle_events_named("journal", |slot: &Slot, seq: i64, end: bool| {
        if end {
            tracing::debug!(seq, raw = slot.value.raw, "journal batch end");
        }
    });

    let balance = Arc::new(Mutex::new(0u64));
    let apply = disruptor.handle_events_named(
        "apply",
        Apply {
            balance: balance.clone(),
            applied: 0,
        },
    );

    disruptor.after(enrich, parse)?;
    disruptor.after(journal, parse)?;
    disruptor.after(apply, enrich)?;
    disruptor.after(apply, journal)?;
    // best effort: logs a warning and runs unpinned where unsupported
    disruptor.pin(parse, CoreAffinity::Core(0))?;

    let running = disruptor.start()?;
    for raw in 1..=EVENTS {
        running.producer().publish_with(|slot, _| slot.value.raw = raw);
    }
    running.shutdown()?;

    // price = raw * 100, fee = raw, net = raw * 99
    let expected = 99 * EVENTS * (EVENTS + 1) / 2;
    let balance = *balance
        .lock()
        .map_err(|_| kaos_disruptor::DisruptorError::IllegalState("balance lock poisoned"))?;
    assert_eq!(balance, expected);
    println!("Verified: balance = {} (expected {})", balance, expected);
    Ok(())
}
