//! Error types for foreman-worker.

use thiserror::Error;

/// Result type for foreman-worker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising jobs.
#[derive(Debug, Error)]
pub enum Error {
    /// Engine or client failure.
    #[error(transparent)]
    Core(#[from] foreman_core::Error),

    /// IPC failure on a child's error channel.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Serialization error on the IPC protocol.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failed to spawn, signal, or wait on a child process.
    #[error("process error: {0}")]
    Process(String),

    /// No handler registered for a job class.
    #[error("no handler registered for job class: {0}")]
    HandlerNotRegistered(String),

    /// Supervisor state is no longer trustworthy; terminate defensively.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
