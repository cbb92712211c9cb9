//! Live-link wire protocol.
//!
//! Plain TCP, one exchange per connection:
//! - Request: raw UTF-8 script bytes, terminated by the client closing its
//!   write side. No header.
//! - Response: `OK`, or `ERROR\n<diagnostic>`. The server closes the
//!   connection after writing it.

use std::time::Duration;

use crate::bridge::ExecutionOutcome;
use crate::error::{Error, Result};

/// Default listen address (loopback).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Largest accepted request, in bytes (10 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Size of each read from the connection.
pub const READ_CHUNK_BYTES: usize = 4096;

/// How long a connection waits for the host to run its script.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single wait for a new connection.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const OK_TAG: &[u8] = b"OK";
const ERROR_TAG: &[u8] = b"ERROR\n";

/// The single reply written for each connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Script executed without error.
    Ok,
    /// Request rejected or script failed.
    Error(String),
}

impl Response {
    /// Request exceeded `limit` bytes.
    pub fn oversize(limit: usize) -> Self {
        Self::Error(format!("Payload exceeds the maximum size of {limit} bytes"))
    }

    /// Client closed without sending anything.
    pub fn empty_payload() -> Self {
        Self::Error("Empty payload: no script received".to_string())
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ok => OK_TAG.to_vec(),
            Self::Error(message) => {
                let mut bytes = Vec::with_capacity(ERROR_TAG.len() + message.len());
                bytes.extend_from_slice(ERROR_TAG);
                bytes.extend_from_slice(message.as_bytes());
                bytes
            }
        }
    }

    /// Decode a complete response as read by a client.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::Protocol(
                "connection closed without a response".to_string(),
            ));
        }
        if bytes == OK_TAG {
            return Ok(Self::Ok);
        }
        if let Some(message) = bytes.strip_prefix(ERROR_TAG) {
            return Ok(Self::Error(String::from_utf8_lossy(message).into_owned()));
        }
        if bytes == b"ERROR" {
            return Ok(Self::Error(String::new()));
        }

        let preview: String = String::from_utf8_lossy(bytes).chars().take(40).collect();
        Err(Error::Protocol(format!("unexpected response: {preview:?}")))
    }

    /// Whether this is the success reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<ExecutionOutcome> for Response {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed => Self::Ok,
            ExecutionOutcome::Failed(diagnostic) => {
                Self::Error(format!("Script execution failed:\n{diagnostic}"))
            }
            ExecutionOutcome::TimedOut(timeout) => Self::Error(format!(
                "Execution timed out after {}s",
                timeout.as_secs_f64()
            )),
            ExecutionOutcome::Abandoned => Self::Error(
                "Execution abandoned: the host dropped the script before running it".to_string(),
            ),
        }
    }
}
