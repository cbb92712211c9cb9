//! Live-link server for Ramen.
//!
//! Accepts TCP connections on a background thread, reads one script per
//! connection, runs it on the host thread through [`ramen_core::bridge`] and
//! replies with `OK` or `ERROR\n<message>`.
//!
//! Connections are served one at a time. At most one server per process is
//! meant to be live; [`registry`] keeps that invariant across reloads.

mod error;
mod handler;
mod listener;
pub mod registry;

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use ramen_core::protocol::{
    ACCEPT_POLL_INTERVAL, DEFAULT_HOST, DEFAULT_PORT, EXECUTION_TIMEOUT, MAX_PAYLOAD_BYTES,
};

pub use error::{ServerError, ServerResult};
pub use listener::{LiveLinkServer, ServerHandle};

/// How long to keep reading a rejected oversize payload before closing.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to. Loopback unless explicitly widened.
    pub host: String,
    /// Port to listen on. `0` picks a free port.
    pub port: u16,
    /// Largest accepted request body.
    pub max_payload_bytes: usize,
    /// How long a connection waits for the host to run its script.
    pub execution_timeout: Duration,
    /// Upper bound on how long the accept loop blocks between shutdown checks.
    pub accept_poll_interval: Duration,
    /// How long to discard input after rejecting an oversize payload.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            execution_timeout: EXECUTION_TIMEOUT,
            accept_poll_interval: ACCEPT_POLL_INTERVAL,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Resolve the configured host and port to a socket address.
    pub fn addr(&self) -> ServerResult<SocketAddr> {
        let target = format!("{}:{}", self.host, self.port);
        target.to_socket_addrs()
            .map_err(|e| ServerError::InvalidAddress(format!("{target}: {e}")))?
            .next()
            .ok_or(ServerError::InvalidAddress(target))
    }
}
