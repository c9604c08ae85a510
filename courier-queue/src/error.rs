//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store could not be reached or answered with an error.
    ///
    /// Enqueue surfaces this to the caller immediately; the worker logs it
    /// and keeps polling.
    #[error("queue store unavailable: {0}")]
    Unavailable(String),

    /// An envelope failed to serialise or parse.
    #[error("queue envelope serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(error: redis::RedisError) -> Self {
        Self::Unavailable(error.to_string())
    }
}
