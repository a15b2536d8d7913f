use thiserror::Error;

/// Errors that can end a replay or reject a configuration change before one starts.
///
/// `Aborted` is deliberately *not* surfaced through this type: an operator-requested abort is a
/// clean outcome, not a failure, and `ReplayEngine::replay` returns it as
/// `Ok(ReplayOutcome::Aborted)` instead (see [`crate::replay::ReplayOutcome`]).
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to open resource: {0}")]
    Resource(String),

    #[error("read failed: {0}")]
    Io(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("timing strategy unavailable on this platform: {0}")]
    PlatformUnavailable(String),
}

impl ReplayError {
    pub fn config(msg: impl Into<String>) -> Self {
        ReplayError::Config(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        ReplayError::Resource(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        ReplayError::Io(msg.into())
    }

    pub fn send(msg: impl Into<String>) -> Self {
        ReplayError::Send(msg.into())
    }
}
