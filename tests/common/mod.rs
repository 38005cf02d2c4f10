#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use ghosttype::clock::{Clock, SimulatedClock};
use ghosttype::config::BehaviorConfig;
use ghosttype::emitter::{KeystrokeEmitter, SpecialKey};
use ghosttype::{Engine, EngineOptions, Session, SessionEvent, SessionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Backspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub key: Key,
    /// Virtual time of the keystroke.
    pub at: Duration,
}

/// Shared view of what a [`RecordingEmitter`] received.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    finished: Arc<AtomicBool>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.calls().into_iter().map(|c| c.key).collect()
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Text after replaying every keystroke against an end-pinned cursor.
    pub fn net_text(&self) -> String {
        snapshots(&self.keys()).pop().unwrap_or_default()
    }

    pub fn backspaces(&self) -> usize {
        self.keys().iter().filter(|k| **k == Key::Backspace).count()
    }
}

/// Text after each keystroke.
pub fn snapshots(keys: &[Key]) -> Vec<String> {
    let mut text = String::new();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        match key {
            Key::Char(c) => text.push(*c),
            Key::Backspace => {
                text.pop();
            }
        }
        out.push(text.clone());
    }
    out
}

pub struct RecordingEmitter {
    clock: SimulatedClock,
    recorder: Recorder,
    fail_after: Option<usize>,
}

impl RecordingEmitter {
    pub fn new(clock: &SimulatedClock) -> (Self, Recorder) {
        let recorder = Recorder::default();
        let emitter = Self {
            clock: clock.clone(),
            recorder: recorder.clone(),
            fail_after: None,
        };
        (emitter, recorder)
    }

    /// Accepts `n` keystrokes, then fails every call.
    pub fn failing_after(clock: &SimulatedClock, n: usize) -> (Self, Recorder) {
        let (mut emitter, recorder) = Self::new(clock);
        emitter.fail_after = Some(n);
        (emitter, recorder)
    }

    fn record(&mut self, key: Key) -> Result<()> {
        let mut calls = self.recorder.calls.lock().unwrap();
        if self.fail_after.is_some_and(|n| calls.len() >= n) {
            return Err(anyhow!("virtual keyboard went away"));
        }
        calls.push(Call {
            key,
            at: self.clock.now(),
        });
        Ok(())
    }
}

impl KeystrokeEmitter for RecordingEmitter {
    fn write_char(&mut self, c: char) -> Result<()> {
        self.record(Key::Char(c))
    }

    fn send_special(&mut self, key: SpecialKey) -> Result<()> {
        match key {
            SpecialKey::Backspace => self.record(Key::Backspace),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.recorder.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn engine(clock: &SimulatedClock) -> Engine {
    Engine::new(EngineOptions {
        clock: Arc::new(clock.clone()),
        ..EngineOptions::default()
    })
}

/// Behavior with every random pause and detour switched off.
pub fn quiet_behavior() -> BehaviorConfig {
    BehaviorConfig {
        sentence_break_chance: 0.0,
        zone_out_chance: 0.0,
        hesitation_chance: 0.0,
        delayed_correction_chance: 0.0,
        filler_base_chance: 0.0,
        filler_punctuation_chance: 0.0,
        filler_sentence_end_chance: 0.0,
        filler_hesitation_chance: 0.0,
        ..BehaviorConfig::default()
    }
}

/// Drain events while the worker runs, then join it.
pub fn run_to_end(engine: &mut Engine, session: Session) -> (SessionOutcome, Vec<SessionEvent>) {
    let events: Vec<SessionEvent> = session.events.iter().collect();
    let outcome = engine.join().expect("worker should not panic");
    (outcome, events)
}

pub fn statuses(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Status(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
