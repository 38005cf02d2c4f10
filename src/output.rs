//! The worker's single path to the emitter.
//!
//! [`TypedOutput`] mirrors what the target window should show, checks the stop and
//! pause signals before every keystroke, and paces keystrokes with the timing model.
//! Mistake injection and filler detours only ever go through it.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;

use crate::cancel::{
    sleep_interruptible, wait_while_paused, CancellationToken, Stopped, POLL_INTERVAL,
};
use crate::clock::Clock;
use crate::emitter::{KeystrokeEmitter, SpecialKey};
use crate::events::{EventSink, SessionEvent};
use crate::session::SessionState;
use crate::timing::TimingModel;

/// Why the worker left its normal flow.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Stopped,
    Emitter(anyhow::Error),
}

impl From<Stopped> for Interrupt {
    fn from(_: Stopped) -> Self {
        Interrupt::Stopped
    }
}

pub(crate) type Flow<T = ()> = Result<T, Interrupt>;

pub(crate) const STATUS_TYPING: &str = "Typing...";
pub(crate) const STATUS_PAUSED: &str = "Paused";

pub(crate) struct TypedOutput {
    emitter: Box<dyn KeystrokeEmitter>,
    visible: Vec<char>,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
    pub(crate) events: EventSink,
    pub(crate) timing: TimingModel,
    pub(crate) rng: StdRng,
    /// State to return to after a pause.
    phase: SessionState,
    keystrokes: usize,
}

impl TypedOutput {
    pub(crate) fn new(
        emitter: Box<dyn KeystrokeEmitter>,
        clock: Arc<dyn Clock>,
        token: CancellationToken,
        events: EventSink,
        timing: TimingModel,
        rng: StdRng,
    ) -> Self {
        Self {
            emitter,
            visible: Vec::new(),
            clock,
            token,
            events,
            timing,
            rng,
            phase: SessionState::Countdown,
            keystrokes: 0,
        }
    }

    pub(crate) fn enter_phase(&mut self, phase: SessionState) {
        self.phase = phase;
        self.events.set_state(phase);
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn visible(&self) -> &[char] {
        &self.visible
    }

    pub(crate) fn visible_text(&self) -> String {
        self.visible.iter().collect()
    }

    pub(crate) fn keystrokes(&self) -> usize {
        self.keystrokes
    }

    /// Stop check, then block for as long as the session is paused.
    pub(crate) fn checkpoint(&mut self) -> Flow {
        let events = &self.events;
        let waited = wait_while_paused(self.clock.as_ref(), &self.token, || {
            events.set_state(SessionState::Paused);
            events.status(STATUS_PAUSED);
        })?;

        if waited {
            self.events.set_state(self.phase);
            if self.phase == SessionState::Typing {
                self.events.status(STATUS_TYPING);
            }
        }
        Ok(())
    }

    /// Interruptible, pausable wait in chunks of at most [`POLL_INTERVAL`].
    pub(crate) fn wait(&mut self, duration: Duration) -> Flow {
        let mut remaining = duration;
        loop {
            self.checkpoint()?;
            if remaining.is_zero() {
                return Ok(());
            }
            let step = remaining.min(POLL_INTERVAL);
            sleep_interruptible(self.clock.as_ref(), &self.token, step)?;
            remaining -= step;
        }
    }

    /// Emit `c` without the per-character delay.
    pub(crate) fn press(&mut self, c: char) -> Flow {
        self.checkpoint()?;
        self.emitter.write_char(c).map_err(Interrupt::Emitter)?;
        self.keystrokes += 1;
        self.visible.push(c);
        self.publish_preview();
        Ok(())
    }

    /// Emit `c`, then wait one sampled character delay.
    pub(crate) fn type_char(&mut self, c: char) -> Flow {
        self.press(c)?;
        let delay = self.timing.char_delay(&mut self.rng);
        self.wait(delay)
    }

    pub(crate) fn type_str(&mut self, s: &str) -> Flow {
        s.chars().try_for_each(|c| self.type_char(c))
    }

    pub(crate) fn type_chars(&mut self, chars: &[char]) -> Flow {
        chars.iter().try_for_each(|&c| self.type_char(c))
    }

    pub(crate) fn backspace(&mut self) -> Flow {
        self.checkpoint()?;
        self.emitter
            .send_special(SpecialKey::Backspace)
            .map_err(Interrupt::Emitter)?;
        self.keystrokes += 1;
        self.visible.pop();
        self.publish_preview();

        let delay = self.timing.backspace_delay(&mut self.rng);
        self.wait(delay)
    }

    pub(crate) fn backspace_n(&mut self, n: usize) -> Flow {
        (0..n).try_for_each(|_| self.backspace())
    }

    pub(crate) fn finish(&mut self) -> anyhow::Result<()> {
        self.emitter.finish()
    }

    fn publish_preview(&self) {
        self.events
            .send(SessionEvent::Preview(self.visible.iter().collect()));
    }
}
