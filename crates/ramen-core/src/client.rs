//! Client side of the live-link: push a script and read the verdict.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{EXECUTION_TIMEOUT, Response};

/// Default time allowed to establish the connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Extra time allowed past the server's execution timeout for the reply to arrive.
pub const RESPONSE_MARGIN: Duration = Duration::from_secs(5);

/// Sends scripts to a running live-link server.
#[derive(Debug, Clone)]
pub struct LiveLinkClient {
    addr: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl LiveLinkClient {
    /// Create a client for `addr` (e.g. `127.0.0.1:8080`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: EXECUTION_TIMEOUT + RESPONSE_MARGIN,
        }
    }

    /// Set how long to wait for the connection.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long to wait for the response once the script is sent.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Wait long enough for a server configured with `timeout` to answer.
    pub fn with_execution_timeout(self, timeout: Duration) -> Self {
        self.with_read_timeout(timeout.saturating_add(RESPONSE_MARGIN))
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `script`, close the write side and wait for the single response.
    pub fn send(&self, script: &str) -> Result<Response> {
        let mut stream = self.connect()?;
        stream.set_read_timeout(Some(self.read_timeout))?;

        tracing::debug!(addr = %self.addr, bytes = script.len(), "Sending script");
        stream.write_all(script.as_bytes())?;
        stream.shutdown(Shutdown::Write)?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::ResponseTimeout {
                addr: self.addr.clone(),
                waited: self.read_timeout,
            },
            _ => Error::Io(e),
        })?;
        Response::parse(&reply)
    }

    fn connect(&self) -> Result<TcpStream> {
        let targets: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|source| Error::Connect {
                addr: self.addr.clone(),
                source,
            })?
            .collect();

        let mut last_error =
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address resolved");
        for target in targets {
            match TcpStream::connect_timeout(&target, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = e,
            }
        }

        Err(Error::Connect {
            addr: self.addr.clone(),
            source: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// One-shot fake server: reads to EOF, replies with `reply`, returns what it read.
    fn fake_server(reply: &'static [u8]) -> (String, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).unwrap();
            stream.write_all(reply).unwrap();
            request
        });
        (addr, server)
    }

    #[test]
    fn test_send_reads_ok() {
        let (addr, server) = fake_server(b"OK");
        let response = LiveLinkClient::new(addr).send("print('hi')").unwrap();
        assert_eq!(response, Response::Ok);
        assert_eq!(server.join().unwrap(), b"print('hi')");
    }

    #[test]
    fn test_send_reads_error() {
        let (addr, server) = fake_server(b"ERROR\nboom");
        let response = LiveLinkClient::new(addr).send("raise").unwrap();
        assert_eq!(response, Response::Error("boom".to_string()));
        server.join().unwrap();
    }

    #[test]
    fn test_slow_server_is_response_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).unwrap();
            thread::sleep(Duration::from_millis(800));
            let _ = stream.write_all(b"OK");
        });

        let client = LiveLinkClient::new(addr).with_read_timeout(Duration::from_millis(200));
        let err = client.send("x = 1").unwrap_err();
        assert!(matches!(
            err,
            Error::ResponseTimeout { waited, .. } if waited == Duration::from_millis(200)
        ));
        assert!(err.with_hint().contains("may still be running the script"));
        server.join().unwrap();
    }

    #[test]
    fn test_execution_timeout_extends_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).unwrap();
            thread::sleep(Duration::from_millis(300));
            stream.write_all(b"OK").unwrap();
        });

        // A bare 100ms read timeout would give up; the margin covers the slow reply.
        let client = LiveLinkClient::new(addr).with_execution_timeout(Duration::from_millis(100));
        assert_eq!(client.send("x = 1").unwrap(), Response::Ok);
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let client = LiveLinkClient::new(format!("127.0.0.1:{port}"))
            .with_connect_timeout(Duration::from_millis(500));
        let err = client.send("x").unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }
}
