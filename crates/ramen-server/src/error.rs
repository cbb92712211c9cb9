//! Error types for the live-link server.

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listen address could not be resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Binding the listening socket failed (address in use, permission denied, ...).
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener thread could not be started.
    #[error("Failed to start listener thread: {0}")]
    Spawn(std::io::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
