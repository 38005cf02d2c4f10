//! Time source for every wait the engine performs.
//!
//! Production sessions use [`SystemClock`]. Tests drive sessions with
//! [`SimulatedClock`], which advances virtual time instantly so that multi-second
//! countdowns and zone-out breaks cost nothing, and which can fire actions (such
//! as stopping a session) at a chosen virtual instant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration`.
    ///
    /// Callers keep `duration` short (see [`crate::cancel::POLL_INTERVAL`]); the
    /// clock itself does not check for cancellation.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type ScheduledAction = Box<dyn FnOnce() + Send>;

/// Virtual clock: `sleep` advances time without blocking.
#[derive(Clone, Default)]
pub struct SimulatedClock {
    elapsed_nanos: Arc<AtomicU64>,
    scheduled: Arc<Mutex<Vec<(Duration, ScheduledAction)>>>,
}

impl std::fmt::Debug for SimulatedClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedClock")
            .field("now", &self.now())
            .finish()
    }
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` on the sleeping thread once virtual time reaches `at`.
    pub fn at(&self, at: Duration, action: impl FnOnce() + Send + 'static) {
        if let Ok(mut scheduled) = self.scheduled.lock() {
            scheduled.push((at, Box::new(action)));
        }
    }

    /// Advance virtual time by `by`, firing any actions that become due.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
        self.fire_due();
    }

    fn fire_due(&self) {
        let now = self.now();
        let due: Vec<ScheduledAction> = match self.scheduled.lock() {
            Ok(mut scheduled) => {
                let mut due = Vec::new();
                let mut idx = 0;
                while idx < scheduled.len() {
                    if scheduled[idx].0 <= now {
                        due.push(scheduled.remove(idx).1);
                    } else {
                        idx += 1;
                    }
                }
                due
            }
            Err(_) => Vec::new(),
        };

        for action in due {
            action();
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // Let a caller thread that is polling for session state make progress.
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn simulated_clock_fires_actions_once_time_is_reached() {
        let clock = SimulatedClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = fired.clone();
            clock.at(Duration::from_millis(250), move || {
                fired.store(true, Ordering::SeqCst)
            });
        }

        clock.sleep(Duration::from_millis(100));
        assert!(!fired.load(Ordering::SeqCst));
        clock.sleep(Duration::from_millis(200));
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(clock.now(), Duration::from_millis(300));
    }
}
