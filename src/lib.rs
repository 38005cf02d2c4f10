pub mod cancel;
pub mod clock;
pub mod config;
pub mod emitter;
pub mod error;
pub mod events;
pub mod filler;
pub mod keyboard;
pub mod mistakes;
mod output;
pub mod report;
pub mod request;
pub mod session;
pub mod timing;

pub use cancel::CancellationToken;
pub use error::{EngineError, FillerError};
pub use events::{EventReceiver, SessionEvent, SessionObserver};
pub use request::{SpeedProfile, TypingRequest};
pub use session::{Engine, EngineOptions, Session, SessionHandle, SessionOutcome, SessionState};
