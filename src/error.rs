use std::time::Duration;

use thiserror::Error;

/// Failures that reach the caller of the engine.
///
/// Cancellation is not an error: a stopped session ends with
/// [`SessionState::Stopped`](crate::session::SessionState::Stopped) and a status
/// message. Filler-service problems never show up here either; they are absorbed
/// by the fallback phrase list.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("keystroke emitter failed: {0:#}")]
    EmitterFailure(anyhow::Error),

    #[error("failed to spawn session worker")]
    Spawn(#[source] std::io::Error),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidConfiguration(msg.into())
    }

    /// Short phrase suitable for a status line.
    pub fn status_phrase(&self) -> &'static str {
        match self {
            EngineError::InvalidConfiguration(_) => "Failed: invalid settings",
            EngineError::EmitterFailure(_) => "Failed: keystroke injection error",
            EngineError::Spawn(_) => "Failed: could not start typing",
        }
    }
}

/// Why a filler phrase could not be fetched from the remote generator.
#[derive(Debug, Error)]
pub enum FillerError {
    #[error("filler request timed out after {0:?}")]
    Timeout(Duration),

    #[error("filler service returned HTTP {0}")]
    Status(u16),

    #[error("filler request failed: {0}")]
    Transport(String),

    #[error("malformed filler response: {0}")]
    MalformedBody(String),

    #[error("filler response contained no typeable text")]
    Empty,

    #[error("filler request cancelled")]
    Cancelled,

    #[error("remote filler generation is not configured")]
    Disabled,
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
