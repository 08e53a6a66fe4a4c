//! Error types for the barge event plumbing.

use std::io;

use thiserror::Error;

/// Network and broker errors.
#[derive(Debug, Error)]
pub enum NetError {
    /// Underlying socket or descriptor failure
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The readiness loop is full
    #[error("poll group capacity exceeded ({0} handles)")]
    CapacityExceeded(usize),

    /// The broker no longer accepts requests
    #[error("request broker is shutting down")]
    ShuttingDown,
}
