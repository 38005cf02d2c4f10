use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{
    sync_channel, Receiver, RecvError, RecvTimeoutError, SyncSender, TryRecvError, TrySendError,
};
use std::sync::Arc;
use std::time::Duration;

use crate::report::SessionStats;
use crate::session::SessionState;

/// Capacity of the worker → caller event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Slots only the end-of-session events may use: the closing states and status,
/// the last usage increment and `Complete`.
const RESERVED_SLOTS: usize = 8;

/// Everything a session tells its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(SessionState),
    Status(String),
    /// Current visible text, after every keystroke.
    Preview(String),
    /// Words typed since the previous increment.
    UsageIncrement(usize),
    Complete {
        stats: SessionStats,
        profile: String,
    },
}

/// Callback-style consumer for [`SessionEvent`]s. Every method defaults to a no-op.
pub trait SessionObserver {
    fn on_state(&mut self, _state: SessionState) {}

    fn on_status(&mut self, _message: &str) {}

    fn on_preview(&mut self, _visible_text: &str) {}

    fn on_usage_increment(&mut self, _words: usize) {}

    fn on_complete(&mut self, _stats: &SessionStats, _profile: &str) {}
}

impl SessionEvent {
    pub fn dispatch(&self, observer: &mut impl SessionObserver) {
        match self {
            SessionEvent::State(state) => observer.on_state(*state),
            SessionEvent::Status(message) => observer.on_status(message),
            SessionEvent::Preview(text) => observer.on_preview(text),
            SessionEvent::UsageIncrement(words) => observer.on_usage_increment(*words),
            SessionEvent::Complete { stats, profile } => observer.on_complete(stats, profile),
        }
    }
}

/// Open a session's event channel.
pub(crate) fn channel(state: Arc<AtomicU8>) -> (EventSink, EventReceiver) {
    let (tx, rx) = sync_channel(EVENT_CHANNEL_CAPACITY);
    let queued = Arc::new(AtomicUsize::new(0));
    let sink = EventSink {
        tx,
        queued: queued.clone(),
        state,
    };
    (sink, EventReceiver { rx, queued })
}

/// Caller side of a session's event stream.
///
/// The stream ends once the worker has exited and every queued event was read, so
/// draining after [`Engine::join`](crate::Engine::join) still yields the final events.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<SessionEvent>,
    queued: Arc<AtomicUsize>,
}

impl EventReceiver {
    fn taken(&self, event: SessionEvent) -> SessionEvent {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        event
    }

    pub fn recv(&self) -> Result<SessionEvent, RecvError> {
        self.rx.recv().map(|e| self.taken(e))
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout).map(|e| self.taken(e))
    }

    pub fn try_recv(&self) -> Result<SessionEvent, TryRecvError> {
        self.rx.try_recv().map(|e| self.taken(e))
    }

    /// Blocking iterator; ends when the worker is gone and the queue is empty.
    pub fn iter(&self) -> impl Iterator<Item = SessionEvent> + '_ {
        std::iter::from_fn(move || self.recv().ok())
    }

    /// Whatever is queued right now.
    pub fn try_iter(&self) -> impl Iterator<Item = SessionEvent> + '_ {
        std::iter::from_fn(move || self.try_recv().ok())
    }
}

/// Worker side of the event channel plus the published state.
///
/// Sends never block. Progress events (previews, usage steps, interim statuses) are
/// dropped once the caller falls behind; the end-of-session events always have room.
pub(crate) struct EventSink {
    tx: SyncSender<SessionEvent>,
    queued: Arc<AtomicUsize>,
    state: Arc<AtomicU8>,
}

impl EventSink {
    /// Send a progress event. Returns false when it was dropped.
    pub(crate) fn send(&self, event: SessionEvent) -> bool {
        let limit = EVENT_CHANNEL_CAPACITY - RESERVED_SLOTS;
        if self.queued.fetch_add(1, Ordering::SeqCst) >= limit {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(?event, "caller is behind, dropping event");
            return false;
        }
        self.push(event)
    }

    /// Send an end-of-session event into the reserved slots.
    pub(crate) fn send_final(&self, event: SessionEvent) -> bool {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.push(event)
    }

    fn push(&self, event: SessionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(?event, "event channel full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                tracing::trace!("event receiver dropped");
                false
            }
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
        let event = SessionEvent::State(state);
        if state.is_terminal() || state == SessionState::Stopping {
            self.send_final(event);
        } else {
            self.send(event);
        }
    }

    pub(crate) fn status(&self, message: impl Into<String>) {
        self.send(SessionEvent::Status(message.into()));
    }

    /// The closing status line ("Done", "Stopped", ...).
    pub(crate) fn final_status(&self, message: impl Into<String>) {
        self.send_final(SessionEvent::Status(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        statuses: Vec<String>,
        usage: usize,
    }

    impl SessionObserver for Collect {
        fn on_status(&mut self, message: &str) {
            self.statuses.push(message.to_string());
        }

        fn on_usage_increment(&mut self, words: usize) {
            self.usage += words;
        }
    }

    #[test]
    fn progress_events_stop_short_of_the_reserved_slots() {
        let (sink, events) = channel(Arc::new(AtomicU8::new(0)));

        for n in 0..EVENT_CHANNEL_CAPACITY {
            sink.send(SessionEvent::Preview(n.to_string()));
        }
        assert!(!sink.send(SessionEvent::UsageIncrement(10)));

        sink.final_status("Done");
        sink.set_state(SessionState::Completed);
        assert_eq!(sink.state.load(Ordering::SeqCst), SessionState::Completed as u8);
        drop(sink);

        let received: Vec<_> = events.iter().collect();
        assert_eq!(received.len(), EVENT_CHANNEL_CAPACITY - RESERVED_SLOTS + 2);
        assert_eq!(
            &received[received.len() - 2..],
            &[
                SessionEvent::Status("Done".to_string()),
                SessionEvent::State(SessionState::Completed),
            ]
        );
    }

    #[test]
    fn reading_frees_room_for_progress_events() {
        let (sink, events) = channel(Arc::new(AtomicU8::new(0)));

        for _ in 0..EVENT_CHANNEL_CAPACITY - RESERVED_SLOTS {
            assert!(sink.send(SessionEvent::UsageIncrement(1)));
        }
        assert!(!sink.send(SessionEvent::UsageIncrement(1)));

        assert_eq!(events.try_recv(), Ok(SessionEvent::UsageIncrement(1)));
        assert!(sink.send(SessionEvent::UsageIncrement(1)));
    }

    #[test]
    fn sends_after_the_receiver_is_gone_are_harmless() {
        let (sink, events) = channel(Arc::new(AtomicU8::new(0)));
        drop(events);
        assert!(!sink.send(SessionEvent::Status("Typing...".to_string())));
        assert!(!sink.send_final(SessionEvent::State(SessionState::Stopped)));
    }

    #[test]
    fn dispatch_routes_to_observer() {
        let mut observer = Collect::default();
        for event in [
            SessionEvent::Status("Typing...".to_string()),
            SessionEvent::UsageIncrement(10),
            SessionEvent::Preview("ignored".to_string()),
            SessionEvent::UsageIncrement(3),
        ] {
            event.dispatch(&mut observer);
        }
        assert_eq!(observer.statuses, vec!["Typing...".to_string()]);
        assert_eq!(observer.usage, 13);
    }
}
