//! The session controller: countdown, the per-character loop, and termination.
//!
//! Each session runs on its own worker thread. The caller only touches the session's
//! [`CancellationToken`] and reads state/events; counters, buffers and pending
//! corrections belong to the worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cancel::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::emitter::KeystrokeEmitter;
use crate::error::{EngineError, Result};
use crate::events::{self, EventReceiver};
use crate::filler::{self, FillerSource, FillerWorkflow, OfflineFillerSource};
use crate::mistakes::{ends_word, is_word_char, MistakeInjector};
use crate::output::{Flow, Interrupt, TypedOutput, STATUS_TYPING};
use crate::report::{SessionReporter, SessionStats};
use crate::request::TypingRequest;
use crate::timing::TimingModel;

pub const COUNTDOWN_TICKS: u32 = 5;
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

const STATUS_BREAK: &str = "Taking a break...";
const STATUS_STOPPED: &str = "Stopped";
const STATUS_CANCELLED: &str = "Cancelled";
const STATUS_DONE: &str = "Done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Countdown = 1,
    Typing = 2,
    Paused = 3,
    Stopping = 4,
    Stopped = 5,
    Completed = 6,
    Failed = 7,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Countdown,
            2 => SessionState::Typing,
            3 => SessionState::Paused,
            4 => SessionState::Stopping,
            5 => SessionState::Stopped,
            6 => SessionState::Completed,
            7 => SessionState::Failed,
            _ => SessionState::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Completed | SessionState::Failed
        )
    }
}

/// Cloneable reference to one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The session's stop/pause signals, e.g. for a Ctrl+C handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// A started session: its handle plus the event stream.
#[derive(Debug)]
pub struct Session {
    pub handle: SessionHandle,
    pub events: EventReceiver,
}

/// What a joined session left behind.
#[derive(Debug)]
pub struct SessionOutcome {
    pub state: SessionState,
    /// Present for completed and stopped sessions, absent when cancelled during the
    /// countdown or failed.
    pub stats: Option<SessionStats>,
    pub visible_text: String,
    pub error: Option<EngineError>,
}

#[derive(Clone)]
pub struct EngineOptions {
    pub clock: Arc<dyn Clock>,
    /// How long starting a new session waits for the previous worker to exit.
    pub join_timeout: Duration,
    pub session_log: Option<PathBuf>,
    pub filler: Arc<dyn FillerSource>,
    pub filler_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            join_timeout: Duration::from_secs(2),
            session_log: None,
            filler: Arc::new(OfflineFillerSource),
            filler_timeout: Duration::from_secs(8),
        }
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("join_timeout", &self.join_timeout)
            .field("session_log", &self.session_log)
            .field("filler_timeout", &self.filler_timeout)
            .finish_non_exhaustive()
    }
}

impl EngineOptions {
    /// Options from a config file, with filler secrets filled in from the environment.
    pub fn from_config(cfg: &EngineConfig) -> Self {
        let filler_settings = filler::remote::settings_with_env(cfg.filler.clone());
        Self {
            clock: Arc::new(SystemClock::new()),
            join_timeout: Duration::from_millis(cfg.join_timeout_ms),
            session_log: cfg.session_log_path(),
            filler: filler::source_from_settings(&filler_settings),
            filler_timeout: Duration::from_millis(filler_settings.timeout_ms),
        }
    }
}

struct ActiveSession {
    handle: SessionHandle,
    thread: JoinHandle<SessionOutcome>,
}

/// Runs at most one typing session at a time.
pub struct Engine {
    options: EngineOptions,
    active: Option<ActiveSession>,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            active: None,
        }
    }

    pub fn start(
        &mut self,
        request: TypingRequest,
        emitter: Box<dyn KeystrokeEmitter>,
    ) -> Result<Session> {
        self.start_with_token(request, emitter, CancellationToken::new())
    }

    /// Like [`Engine::start`], with a caller-supplied token.
    pub fn start_with_token(
        &mut self,
        request: TypingRequest,
        emitter: Box<dyn KeystrokeEmitter>,
        token: CancellationToken,
    ) -> Result<Session> {
        self.retire_active();

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        // The worker owns this from here on; Countdown is its first state.
        let state = Arc::new(AtomicU8::new(SessionState::Countdown as u8));
        let (sink, rx) = events::channel(state.clone());
        let handle = SessionHandle {
            id,
            token: token.clone(),
            state,
        };

        let rng = match request.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let out = TypedOutput::new(
            emitter,
            self.options.clock.clone(),
            token,
            sink,
            TimingModel::from_request(&request),
            rng,
        );
        let filler = request.advanced_anti_detect().then(|| {
            FillerWorkflow::new(
                &request,
                self.options.filler.clone(),
                self.options.filler_timeout,
            )
        });
        let worker = Worker {
            id,
            mistakes: MistakeInjector::new(&request),
            reporter: SessionReporter::new(request.profile(), self.options.session_log.clone()),
            filler,
            out,
            request,
        };

        let thread = std::thread::Builder::new()
            .name(format!("ghosttype-session-{id}"))
            .spawn(move || worker.run())
            .map_err(EngineError::Spawn)?;

        self.active = Some(ActiveSession {
            handle: handle.clone(),
            thread,
        });
        Ok(Session { handle, events: rx })
    }

    /// Request a stop. No-op once the session has terminated.
    pub fn stop(&self, handle: &SessionHandle) {
        if !handle.state().is_terminal() {
            handle.token.stop();
        }
    }

    pub fn pause(&self, handle: &SessionHandle) {
        if !handle.state().is_terminal() {
            handle.token.pause();
        }
    }

    pub fn resume(&self, handle: &SessionHandle) {
        handle.token.resume();
    }

    /// State of the active session, or `Idle` when there is none.
    pub fn state(&self) -> SessionState {
        self.active
            .as_ref()
            .map(|a| a.handle.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Wait for the active session to end.
    pub fn join(&mut self) -> Option<SessionOutcome> {
        let active = self.active.take()?;
        match active.thread.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::error!(session = active.handle.id, "session worker panicked");
                None
            }
        }
    }

    /// Stop the previous session and give it a bounded time to exit.
    fn retire_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.handle.token.stop();

        let deadline = Instant::now() + self.options.join_timeout;
        while !active.thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        if active.thread.is_finished() {
            if active.thread.join().is_err() {
                tracing::error!(session = active.handle.id, "previous session worker panicked");
            }
        } else {
            tracing::warn!(
                session = active.handle.id,
                timeout = ?self.options.join_timeout,
                "previous session did not exit in time, detaching it"
            );
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.handle.token.stop();
        }
    }
}

enum Ending {
    Completed,
    Stopped,
    Cancelled,
    Failed(anyhow::Error),
}

struct Worker {
    id: u64,
    request: TypingRequest,
    out: TypedOutput,
    mistakes: MistakeInjector,
    filler: Option<FillerWorkflow>,
    reporter: SessionReporter,
}

impl Worker {
    fn run(mut self) -> SessionOutcome {
        let span = tracing::info_span!("session", id = self.id);
        let _enter = span.enter();
        tracing::info!(
            chars = self.request.text().chars().count(),
            profile = %self.request.profile(),
            advanced = self.request.advanced_anti_detect(),
            preview_only = self.request.preview_only(),
            "session started"
        );

        let ending = match self.countdown() {
            Err(Interrupt::Stopped) => Ending::Cancelled,
            Err(Interrupt::Emitter(err)) => Ending::Failed(err),
            Ok(()) => match self.type_text() {
                Ok(()) => Ending::Completed,
                Err(Interrupt::Stopped) => Ending::Stopped,
                Err(Interrupt::Emitter(err)) => Ending::Failed(err),
            },
        };

        self.finish(ending)
    }

    fn countdown(&mut self) -> Flow {
        self.out.enter_phase(SessionState::Countdown);
        for remaining in (1..=COUNTDOWN_TICKS).rev() {
            self.out
                .events
                .status(format!("Starting in {remaining}..."));
            self.out.wait(COUNTDOWN_TICK)?;
        }
        self.out.checkpoint()
    }

    fn type_text(&mut self) -> Flow {
        self.out.enter_phase(SessionState::Typing);
        self.out.events.status(STATUS_TYPING);
        self.reporter.start(self.out.clock().now());

        let chars: Vec<char> = self.request.text().chars().collect();
        let mut i = 0;
        while i < chars.len() {
            self.out.checkpoint()?;
            let c = chars[i];
            self.mistakes.tick();

            self.mistakes.resolve_due(&mut self.out)?;

            if ends_word(c) {
                self.mistakes.maybe_plant(&mut self.out)?;
            }

            let prev = i.checked_sub(1).map(|p| chars[p]);
            let words = self.reporter.words();
            let fire = self
                .filler
                .as_ref()
                .is_some_and(|f| f.should_fire(prev, words, &mut self.out.rng));
            if fire {
                if let Some(next) = self.filler_detour(&chars, i)? {
                    i = next;
                    continue;
                }
            }

            self.mistakes.maybe_immediate_typo(&mut self.out, c)?;
            self.mistakes.maybe_hesitate(&mut self.out)?;

            self.out.type_char(c)?;
            self.reporter.record_char(c, &self.out.events);
            i += 1;
            self.after_char(c, i)?;
        }

        self.mistakes.resolve_all(&mut self.out)
    }

    /// Run a filler detour before index `i`. When `i` is inside a word, the partial
    /// word is erased first and the whole word retyped afterwards; the returned index
    /// is then the first character after that word.
    fn filler_detour(&mut self, chars: &[char], i: usize) -> Flow<Option<usize>> {
        let Some(filler) = self.filler.as_mut() else {
            return Ok(None);
        };

        let mid_word = i > 0 && is_word_char(chars[i - 1]) && is_word_char(chars[i]);
        let mut start = i;
        if mid_word {
            while start > 0 && is_word_char(chars[start - 1]) {
                start -= 1;
            }
        }

        self.out.backspace_n(i - start)?;
        let attempt = filler.run_detour(&mut self.out, self.reporter.words())?;
        tracing::debug!(
            phrase = %attempt.result,
            fallback = attempt.was_fallback,
            context_chars = attempt.context_prefix.chars().count(),
            "filler detour finished"
        );

        if !mid_word {
            return Ok(None);
        }

        self.out.type_chars(&chars[start..i])?;
        let mut end = i;
        while end < chars.len() && is_word_char(chars[end]) {
            let c = chars[end];
            self.mistakes.tick();
            self.out.type_char(c)?;
            self.reporter.record_char(c, &self.out.events);
            end += 1;
        }
        self.after_char(chars[end - 1], end)?;
        Ok(Some(end))
    }

    fn after_char(&mut self, c: char, typed_count: usize) -> Flow {
        let pauses = self
            .out
            .timing
            .pauses_after(c, typed_count, &mut self.out.rng);
        for pause in pauses {
            if pause.kind.is_break() {
                self.out.events.status(STATUS_BREAK);
            }
            self.out.wait(pause.duration)?;
            if pause.kind.is_break() {
                self.out.events.status(STATUS_TYPING);
            }
        }
        Ok(())
    }

    fn finish(mut self, ending: Ending) -> SessionOutcome {
        let now = self.out.clock().now();
        let visible_text = self.out.visible_text();
        let typos = self.mistakes.typos_injected();

        if let Err(err) = self.out.finish() {
            tracing::warn!(error = %format!("{err:#}"), "emitter cleanup failed");
        }

        let (state, stats, error) = match ending {
            Ending::Completed => {
                self.out.events.final_status(STATUS_DONE);
                let stats = self
                    .reporter
                    .finish(now, true, typos, &visible_text, &self.out.events);
                (SessionState::Completed, Some(stats), None)
            }
            Ending::Stopped => {
                self.out.events.set_state(SessionState::Stopping);
                self.out.events.final_status(STATUS_STOPPED);
                if !self.mistakes.pending().is_empty() {
                    tracing::debug!(
                        abandoned = self.mistakes.pending().len(),
                        "abandoning delayed corrections"
                    );
                }
                let stats = self
                    .reporter
                    .finish(now, false, typos, &visible_text, &self.out.events);
                (SessionState::Stopped, Some(stats), None)
            }
            Ending::Cancelled => {
                self.out.events.final_status(STATUS_CANCELLED);
                (SessionState::Stopped, None, None)
            }
            Ending::Failed(err) => {
                tracing::error!(error = %format!("{err:#}"), "keystroke emitter failed");
                let error = EngineError::EmitterFailure(err);
                self.out.events.final_status(error.status_phrase());
                (SessionState::Failed, None, Some(error))
            }
        };

        tracing::debug!(keystrokes = self.out.keystrokes(), ?state, "session ended");
        self.out.events.set_state(state);

        SessionOutcome {
            state,
            stats,
            visible_text,
            error,
        }
    }
}
