//! Wait strategies: how a consumer idles until a sequence becomes available.
//!
//! - `BusySpin` - tight loop, lowest latency, burns a core
//! - `Yielding` - spins briefly, then yields the processor between checks
//! - `Sleeping` - spin, yield, then park with exponential backoff
//! - `Blocking` - parks on a condvar signalled by publishers
//!
//! Every variant re-checks the barrier signal on each iteration and after each
//! wake, so a spurious wakeup never satisfies a wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::disruptor::alert::WaitSignal;
use crate::disruptor::sequence::{minimum_sequence, Sequence};
use crate::error::{DisruptorError, Result};

const DEFAULT_SPIN_TRIES: u32 = 100;
const DEFAULT_SLEEP_RETRIES: u32 = 200;
const DEFAULT_MIN_PARK: Duration = Duration::from_nanos(100);
const DEFAULT_MAX_PARK: Duration = Duration::from_micros(100);

#[derive(Debug, Clone)]
pub enum WaitStrategy {
    BusySpin,
    Yielding {
        spin_tries: u32,
    },
    Sleeping {
        retries: u32,
        min_park: Duration,
        max_park: Duration,
    },
    Blocking(BlockingWait),
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::yielding()
    }
}

impl WaitStrategy {
    pub fn busy_spin() -> Self {
        Self::BusySpin
    }

    pub fn yielding() -> Self {
        Self::Yielding {
            spin_tries: DEFAULT_SPIN_TRIES,
        }
    }

    pub fn sleeping() -> Self {
        Self::Sleeping {
            retries: DEFAULT_SLEEP_RETRIES,
            min_park: DEFAULT_MIN_PARK,
            max_park: DEFAULT_MAX_PARK,
        }
    }

    /// Sleeping strategy with explicit backoff bounds.
    ///
    /// The first half of `retries` spins, the second half yields, after which
    /// the park time doubles from `min_park` up to `max_park`.
    pub fn sleeping_with(retries: u32, min_park: Duration, max_park: Duration) -> Result<Self> {
        if min_park.is_zero() {
            return Err(DisruptorError::config("min park time must be greater than 0"));
        }
        if min_park > max_park {
            return Err(DisruptorError::config(
                "min park time cannot exceed max park time",
            ));
        }
        Ok(Self::Sleeping {
            retries,
            min_park,
            max_park,
        })
    }

    pub fn blocking() -> Self {
        Self::Blocking(BlockingWait::default())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BusySpin => "busy-spin",
            Self::Yielding { .. } => "yielding",
            Self::Sleeping { .. } => "sleeping",
            Self::Blocking(_) => "blocking",
        }
    }

    /// Wait until `min(cursor, dependents) >= sequence`.
    ///
    /// Returns the available sequence, which may exceed `sequence`. With a
    /// `deadline`, expiry returns the best available sequence instead of
    /// failing.
    pub fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        signal: &WaitSignal,
        deadline: Option<Instant>,
    ) -> Result<i64> {
        match self {
            Self::Blocking(blocking) => {
                blocking.wait_for(sequence, cursor, dependents, signal, deadline)
            }
            _ => {
                let mut idle = Idler::new(self);
                poll(sequence, cursor, dependents, signal, deadline, || {
                    idle.idle(deadline)
                })
            }
        }
    }

    /// Wake threads parked in a blocking wait. No-op for polling variants.
    #[inline]
    pub fn signal_all_when_blocking(&self) {
        if let Self::Blocking(blocking) = self {
            blocking.signal_all();
        }
    }
}

#[inline]
pub(crate) fn available_sequence(cursor: &Sequence, dependents: &[Arc<Sequence>]) -> i64 {
    let published = cursor.get();
    if dependents.is_empty() {
        published
    } else {
        minimum_sequence(dependents, published).min(published)
    }
}

#[inline]
fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn poll<F: FnMut()>(
    sequence: i64,
    cursor: &Sequence,
    dependents: &[Arc<Sequence>],
    signal: &WaitSignal,
    deadline: Option<Instant>,
    mut idle: F,
) -> Result<i64> {
    loop {
        let available = available_sequence(cursor, dependents);
        if available >= sequence {
            return Ok(available);
        }
        signal.check()?;
        if expired(deadline) {
            return Ok(available);
        }
        idle();
    }
}

/// Per-wait backoff state for the polling variants.
struct Idler<'a> {
    strategy: &'a WaitStrategy,
    counter: u32,
    park: Duration,
}

impl<'a> Idler<'a> {
    fn new(strategy: &'a WaitStrategy) -> Self {
        let (counter, park) = match strategy {
            WaitStrategy::Yielding { spin_tries } => (*spin_tries, Duration::ZERO),
            WaitStrategy::Sleeping {
                retries, min_park, ..
            } => (*retries, *min_park),
            _ => (0, Duration::ZERO),
        };
        Self {
            strategy,
            counter,
            park,
        }
    }

    #[inline]
    fn idle(&mut self, deadline: Option<Instant>) {
        match self.strategy {
            WaitStrategy::Yielding { .. } => {
                if self.counter == 0 {
                    std::thread::yield_now();
                } else {
                    self.counter -= 1;
                    std::hint::spin_loop();
                }
            }
            WaitStrategy::Sleeping {
                retries, max_park, ..
            } => {
                if self.counter > retries / 2 {
                    self.counter -= 1;
                    std::hint::spin_loop();
                } else if self.counter > 0 {
                    self.counter -= 1;
                    std::thread::yield_now();
                } else {
                    let mut park = self.park;
                    if let Some(d) = deadline {
                        park = park.min(d.saturating_duration_since(Instant::now()));
                    }
                    std::thread::park_timeout(park);
                    self.park = (self.park * 2).min(*max_park);
                }
            }
            _ => std::hint::spin_loop(),
        }
    }
}

/// Condvar-backed wait. Cloning yields a fresh, unshared condvar.
#[derive(Debug, Default)]
pub struct BlockingWait {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Clone for BlockingWait {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl BlockingWait {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        signal: &WaitSignal,
        deadline: Option<Instant>,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.lock.lock();
            // Publishers and alert() take the lock before notifying, so the
            // re-check under the lock cannot miss a wakeup.
            while cursor.get() < sequence {
                signal.check()?;
                match deadline {
                    Some(d) => {
                        if self.cond.wait_until(&mut guard, d).timed_out() {
                            return Ok(available_sequence(cursor, dependents));
                        }
                    }
                    None => self.cond.wait(&mut guard),
                }
            }
        }

        // Upstream consumers never signal the condvar; poll them.
        poll(sequence, cursor, dependents, signal, deadline, std::thread::yield_now)
    }

    pub fn signal_all(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn all_strategies() -> Vec<WaitStrategy> {
        vec![
            WaitStrategy::busy_spin(),
            WaitStrategy::yielding(),
            WaitStrategy::sleeping(),
            WaitStrategy::blocking(),
        ]
    }

    #[test]
    fn test_returns_immediately_when_available() {
        let cursor = Sequence::new(7);
        let signal = WaitSignal::new();
        for strategy in all_strategies() {
            let available = strategy.wait_for(3, &cursor, &[], &signal, None).unwrap();
            assert_eq!(available, 7, "{}", strategy.name());
        }
    }

    #[test]
    fn test_bounded_by_dependents() {
        let cursor = Sequence::new(10);
        let deps = vec![Arc::new(Sequence::new(6)), Arc::new(Sequence::new(4))];
        let signal = WaitSignal::new();
        for strategy in all_strategies() {
            let available = strategy.wait_for(4, &cursor, &deps, &signal, None).unwrap();
            assert_eq!(available, 4, "{}", strategy.name());
        }
    }

    #[test]
    fn test_waits_for_publish() {
        for strategy in all_strategies() {
            let cursor = Arc::new(Sequence::default());
            let signal = Arc::new(WaitSignal::new());
            let strategy = Arc::new(strategy);

            let (c, s, w) = (cursor.clone(), signal.clone(), strategy.clone());
            let waiter = thread::spawn(move || w.wait_for(2, &c, &[], &s, None));

            thread::sleep(Duration::from_millis(10));
            cursor.set(1);
            strategy.signal_all_when_blocking();
            thread::sleep(Duration::from_millis(10));
            cursor.set(3);
            strategy.signal_all_when_blocking();

            assert_eq!(waiter.join().unwrap(), Ok(3), "{}", strategy.name());
        }
    }

    #[test]
    fn test_alert_wakes_waiter() {
        for strategy in all_strategies() {
            let cursor = Arc::new(Sequence::default());
            let signal = Arc::new(WaitSignal::new());
            let strategy = Arc::new(strategy);

            let (c, s, w) = (cursor.clone(), signal.clone(), strategy.clone());
            let waiter = thread::spawn(move || w.wait_for(0, &c, &[], &s, None));

            thread::sleep(Duration::from_millis(10));
            signal.alert();
            strategy.signal_all_when_blocking();

            assert_eq!(
                waiter.join().unwrap(),
                Err(DisruptorError::Alert),
                "{}",
                strategy.name()
            );
        }
    }

    #[test]
    fn test_interrupt_wakes_waiter() {
        for strategy in all_strategies() {
            let cursor = Arc::new(Sequence::default());
            let signal = Arc::new(WaitSignal::new());
            let strategy = Arc::new(strategy);

            let (c, s, w) = (cursor.clone(), signal.clone(), strategy.clone());
            let waiter = thread::spawn(move || w.wait_for(0, &c, &[], &s, None));

            thread::sleep(Duration::from_millis(10));
            signal.interrupt();
            strategy.signal_all_when_blocking();

            assert_eq!(
                waiter.join().unwrap(),
                Err(DisruptorError::Interrupted),
                "{}",
                strategy.name()
            );
            // consumed by the waiter
            assert!(!signal.is_interrupt_pending(), "{}", strategy.name());
        }
    }

    #[test]
    fn test_timeout_returns_best_effort() {
        let cursor = Sequence::new(1);
        let signal = WaitSignal::new();
        for strategy in all_strategies() {
            let deadline = Instant::now() + Duration::from_millis(5);
            let available = strategy
                .wait_for(5, &cursor, &[], &signal, Some(deadline))
                .unwrap();
            assert_eq!(available, 1, "{}", strategy.name());
            assert!(Instant::now() >= deadline);
        }
    }

    #[test]
    fn test_sleeping_rejects_bad_bounds() {
        assert!(WaitStrategy::sleeping_with(10, Duration::ZERO, Duration::from_micros(1)).is_err());
        assert!(
            WaitStrategy::sleeping_with(10, Duration::from_micros(10), Duration::from_micros(1))
                .is_err()
        );
        assert!(
            WaitStrategy::sleeping_with(10, Duration::from_micros(1), Duration::from_micros(1))
                .is_ok()
        );
    }

    #[test]
    fn test_blocking_clone_is_independent() {
        let original = BlockingWait::default();
        let cloned = original.clone();
        assert!(!std::ptr::eq(&original.cond, &cloned.cond));
    }
}
