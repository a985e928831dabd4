//! Error types.
//!
//! Configuration problems surface at construction. `Alert` and `Interrupted`
//! are the two ways out of a wait that are not "the sequence is available".

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DisruptorError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisruptorError {
    /// Invalid construction parameters (capacity, park bounds, graph cycles).
    #[error("config: {0}")]
    Config(String),
    /// The barrier was alerted; the caller should stop processing.
    #[error("alerted")]
    Alert,
    /// A blocking wait was interrupted before the sequence became available.
    #[error("interrupted")]
    Interrupted,
    /// Lifecycle misuse, e.g. running a consumer twice.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    /// The OS refused to start a consumer thread.
    #[error("spawn: {0}")]
    Spawn(String),
    /// A consumer thread panicked before it could be joined.
    #[error("consumer thread '{0}' panicked")]
    ConsumerPanicked(String),
}

impl DisruptorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
