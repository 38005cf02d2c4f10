use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

/// Longest single sleep the engine ever performs.
///
/// Every longer wait is split into chunks of at most this size, which bounds the
/// time between a stop request and the worker noticing it.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stop/pause signals for one session.
///
/// `stopped` is sticky: once set it stays set. `paused` can be toggled freely.
/// The caller writes, the session worker reads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    stopped: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Flip the pause signal and return the new value.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Returned by a wait that was cut short by a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopped;

pub fn sleep_interruptible(
    clock: &dyn Clock,
    token: &CancellationToken,
    duration: Duration,
) -> Result<(), Stopped> {
    let mut remaining = duration;
    loop {
        if token.is_stopped() {
            return Err(Stopped);
        }
        if remaining.is_zero() {
            return Ok(());
        }
        let step = remaining.min(POLL_INTERVAL);
        clock.sleep(step);
        remaining -= step;
    }
}

/// Block while the token is paused.
///
/// `on_pause` runs once, before the first poll, if the token was paused on entry.
/// Returns `Ok(true)` when the call actually waited.
pub fn wait_while_paused(
    clock: &dyn Clock,
    token: &CancellationToken,
    on_pause: impl FnOnce(),
) -> Result<bool, Stopped> {
    if token.is_stopped() {
        return Err(Stopped);
    }
    if !token.is_paused() {
        return Ok(false);
    }

    on_pause();
    while token.is_paused() {
        if token.is_stopped() {
            return Err(Stopped);
        }
        clock.sleep(POLL_INTERVAL);
    }

    if token.is_stopped() {
        return Err(Stopped);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    #[test]
    fn long_waits_are_split_into_poll_sized_chunks() {
        let clock = SimulatedClock::new();
        let token = CancellationToken::new();
        {
            let token = token.clone();
            clock.at(Duration::from_millis(350), move || token.stop());
        }

        let res = sleep_interruptible(&clock, &token, Duration::from_secs(30));
        assert_eq!(res, Err(Stopped));
        assert_eq!(clock.now(), Duration::from_millis(400));
    }

    #[test]
    fn toggle_pause_reports_new_state() {
        let token = CancellationToken::new();
        assert!(token.toggle_pause());
        assert!(token.is_paused());
        assert!(!token.toggle_pause());
        assert!(!token.is_paused());
    }

    #[test]
    fn paused_wait_observes_stop() {
        let clock = SimulatedClock::new();
        let token = CancellationToken::new();
        token.pause();
        {
            let token = token.clone();
            clock.at(Duration::from_secs(3), move || token.stop());
        }

        let mut notified = false;
        let res = wait_while_paused(&clock, &token, || notified = true);
        assert_eq!(res, Err(Stopped));
        assert!(notified);
    }
}
