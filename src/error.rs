//! Error types for lanework.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    /// Publish or consume attempted before `Broker::connect`. A programming
    /// error, never retried.
    #[error("broker not connected: call connect() first")]
    NotConnected,

    #[error("timed out acquiring lock {key} after {waited_ms}ms")]
    LockTimeout { key: String, waited_ms: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("extraction response: {0}")]
    Parse(#[from] ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Failures of the fenced-JSON grammar used for structured model output.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("code fence opened but never closed")]
    UnterminatedFence,

    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl Error {
    /// Transport-level failures that a reconnect or the next cycle may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Broker(_) | Error::Redis(_) | Error::Http(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
