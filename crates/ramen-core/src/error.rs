//! Error types for ramen-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for ramen-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ramen-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not reach the live-link server.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No response arrived before the client stopped waiting.
    #[error("no response from {addr} within {waited:?}")]
    ResponseTimeout { addr: String, waited: std::time::Duration },

    /// Peer sent something that is not a valid live-link response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to read or write a file.
    #[error("failed to access {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Node dump JSON did not match the expected schema.
    #[error("invalid node dump: {0}")]
    Dump(#[from] serde_json::Error),

    /// Script interpreter could not be located or started.
    #[error("interpreter error: {0}")]
    Interpreter(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render the error together with a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Connect { .. } => Some(
                "Is the live-link server running inside the host application? \
                 Check the host and port it listens on.",
            ),
            Error::ResponseTimeout { .. } => Some(
                "The server may still be running the script. \
                 Pass a larger --timeout to wait longer.",
            ),
            Error::Protocol(_) => Some(
                "The server closed the connection without answering. \
                 This happens when the script is not valid UTF-8.",
            ),
            Error::Interpreter(_) => Some("Pass --interpreter with a program on PATH."),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
