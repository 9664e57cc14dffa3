//! Error types for teststand.

use thiserror::Error;

/// Main error type for all station operations.
#[derive(Debug, Error)]
pub enum StationError {
    /// I/O error on the byte transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ring buffer cannot take the whole write.
    #[error("Buffer full: {requested} bytes requested, {available} available")]
    BufferFull { requested: usize, available: usize },

    /// Encoded content does not fit the 16-bit length field.
    #[error("Content too large: {0} bytes")]
    ContentTooLarge(usize),

    /// Bounded queue rejected a push.
    #[error("Queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Queue was closed for shutdown.
    #[error("Queue closed")]
    QueueClosed,

    /// Worker pool no longer accepts work.
    #[error("Worker pool shut down")]
    PoolShutdown,

    /// Configuration value outside its usable range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Protocol error (malformed document, bad field types, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No route for the given sub-command.
    #[error("Unknown command: {0:#04x}")]
    UnknownCommand(i64),

    /// No executor registered for the given test tag.
    #[error("Unknown test type: {0}")]
    UnknownTest(String),

    /// A test executor reported a failure it could not turn into a result.
    #[error("Executor error: {0}")]
    Executor(String),
}

/// Result type alias using StationError.
pub type Result<T> = std::result::Result<T, StationError>;
