//! Connection handler: one accepted stream, one request, one response.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ramen_core::bridge;
use ramen_core::protocol::{READ_CHUNK_BYTES, Response};
use ramen_core::HostScheduler;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::ServerConfig;

/// Everything a connection needs, shared by all connections of one server.
pub(crate) struct ConnectionContext {
    scheduler: Arc<dyn HostScheduler>,
    max_payload_bytes: usize,
    execution_timeout: Duration,
    drain_timeout: Duration,
}

impl ConnectionContext {
    pub(crate) fn new(config: &ServerConfig, scheduler: Arc<dyn HostScheduler>) -> Self {
        Self {
            scheduler,
            max_payload_bytes: config.max_payload_bytes,
            execution_timeout: config.execution_timeout,
            drain_timeout: config.drain_timeout,
        }
    }
}

/// Result of reading a request body.
#[derive(Debug, PartialEq, Eq)]
enum Payload {
    /// Peer closed its write side; everything it sent.
    Complete(Vec<u8>),
    /// Running total passed the limit; buffered bytes were discarded.
    Oversize { read: usize },
}

/// Serve one connection end to end. The stream is closed when this returns,
/// whatever happened.
pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) {
    match exchange(&mut stream, &ctx).await {
        Ok(Some(response)) => {
            tracing::debug!(%peer, ok = response.is_ok(), "Connection handled");
        }
        Ok(None) => {
            tracing::debug!(%peer, "Connection closed without a response");
        }
        Err(e) => {
            tracing::warn!(%peer, "Connection error: {}", e);
        }
    }
}

/// Run the request/response exchange. Returns the response written, or
/// `None` when the request was dropped without one.
async fn exchange<S>(stream: &mut S, ctx: &ConnectionContext) -> io::Result<Option<Response>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = match read_payload(stream, ctx.max_payload_bytes).await? {
        Payload::Complete(bytes) => bytes,
        Payload::Oversize { read } => {
            tracing::warn!(read, limit = ctx.max_payload_bytes, "Rejecting oversize payload");
            let response = Response::oversize(ctx.max_payload_bytes);
            write_response(stream, &response).await?;
            drain(stream, ctx.drain_timeout).await;
            return Ok(Some(response));
        }
    };

    if bytes.is_empty() {
        let response = Response::empty_payload();
        write_response(stream, &response).await?;
        return Ok(Some(response));
    }

    let script = match String::from_utf8(bytes) {
        Ok(script) => script,
        Err(e) => {
            // Dropped without a reply; the peer only sees the connection close.
            tracing::warn!("Payload is not valid UTF-8: {}", e);
            return Ok(None);
        }
    };

    tracing::debug!(bytes = script.len(), "Received script");
    let pending = bridge::submit(ctx.scheduler.as_ref(), script);
    let response = Response::from(pending.wait(ctx.execution_timeout).await);
    write_response(stream, &response).await?;
    Ok(Some(response))
}

/// Read fixed-size chunks until EOF, giving up once `limit` is exceeded.
async fn read_payload<R>(reader: &mut R, limit: usize) -> io::Result<Payload>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Payload::Complete(data));
        }

        let total = data.len() + n;
        if total > limit {
            return Ok(Payload::Oversize { read: total });
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&response.encode()).await?;
    writer.shutdown().await
}

/// Discard what the peer is still sending so it can finish writing and read
/// our response instead of hitting a reset.
async fn drain<R>(reader: &mut R, timeout: Duration)
where
    R: AsyncRead + Unpin,
{
    let mut sink = tokio::io::sink();
    match tokio::time::timeout(timeout, tokio::io::copy(reader, &mut sink)).await {
        Ok(Ok(discarded)) => tracing::debug!(discarded, "Drained rejected payload"),
        Ok(Err(e)) => tracing::debug!("Drain stopped: {}", e),
        Err(_) => tracing::debug!("Drain deadline reached"),
    }
}
