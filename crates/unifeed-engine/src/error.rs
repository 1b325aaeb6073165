//! Engine error types.

use thiserror::Error;
use unifeed_core::{SourceId, UserId};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No source with the given id is registered.
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    /// No user with the given id is registered.
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// The scheduler's command channel is closed.
    #[error("scheduler is not running")]
    SchedulerStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_id() {
        let err = EngineError::UnknownSource(SourceId(42));
        assert_eq!(err.to_string(), "unknown source: 42");
    }
}
