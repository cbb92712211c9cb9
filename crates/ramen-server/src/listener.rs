//! Background listener: binds, accepts and hands connections to the handler,
//! one at a time, until told to stop.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ramen_core::HostScheduler;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ServerError, ServerResult};
use crate::handler::{self, ConnectionContext};
use crate::ServerConfig;

/// Name of the listener thread.
pub const LISTENER_THREAD_NAME: &str = "ramen-live-link";

/// How long [`ServerHandle::stop`] waits for the listening socket to be released.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Entry point for starting live-link servers.
pub struct LiveLinkServer;

impl LiveLinkServer {
    /// Bind `config`'s address and start accepting on a background thread.
    ///
    /// Binding happens before this returns, so an address already in use is
    /// reported here rather than on the background thread.
    pub fn start(
        config: ServerConfig,
        scheduler: Arc<dyn HostScheduler>,
    ) -> ServerResult<ServerHandle> {
        let addr = config.addr()?;
        let listener = std::net::TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (released_tx, released_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let ctx = Arc::new(ConnectionContext::new(&config, scheduler));

        let accept = AcceptLoop {
            ctx,
            poll_interval: config.accept_poll_interval,
            shutdown: shutdown_rx,
            released: released_tx,
            running: running.clone(),
        };

        // The runtime lives and dies on the listener thread, never on the caller,
        // which may itself be inside an async context.
        std::thread::Builder::new()
            .name(LISTENER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                runtime.block_on(async move {
                    match TcpListener::from_std(listener) {
                        Ok(listener) => accept.run(listener).await,
                        Err(e) => {
                            tracing::error!("Failed to register listener: {}", e);
                            accept.running.store(false, Ordering::SeqCst);
                        }
                    }
                });
            })
            .map_err(ServerError::Spawn)?;

        ready_rx
            .recv()
            .map_err(|_| io::Error::other("listener thread exited during startup"))??;

        tracing::info!("Live-link server listening on {}", local_addr);

        Ok(ServerHandle {
            local_addr,
            running,
            shutdown: shutdown_tx,
            released: Mutex::new(Some(released_rx)),
        })
    }
}

/// Handle to a running server. Dropping it stops the server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    released: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ServerHandle {
    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the listener is still accepting.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting and release the listening socket.
    ///
    /// Safe to call any number of times. Returns once the socket is closed
    /// (or after a short grace period); a connection already being served is
    /// allowed to finish on its own.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);

        let released = self
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(released) = released else {
            return;
        };

        match released.recv_timeout(STOP_GRACE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("Live-link server on {} stopped", self.local_addr);
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Live-link listener on {} did not release within {:?}",
                    self.local_addr,
                    STOP_GRACE
                );
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcceptLoop {
    ctx: Arc<ConnectionContext>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
    released: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
}

impl AcceptLoop {
    async fn run(mut self, listener: TcpListener) {
        let mut in_flight: Option<JoinHandle<()>> = None;

        while !*self.shutdown.borrow() {
            let accepted = tokio::select! {
                _ = self.shutdown.changed() => break,
                accepted = tokio::time::timeout(self.poll_interval, listener.accept()) => accepted,
            };

            let (stream, peer) = match accepted {
                // Poll interval elapsed; re-check the shutdown flag.
                Err(_) => continue,
                Ok(Err(e)) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                Ok(Ok(pair)) => pair,
            };

            tracing::debug!(%peer, "Accepted connection");
            let mut task = tokio::spawn(handler::handle_connection(stream, peer, self.ctx.clone()));

            tokio::select! {
                joined = &mut task => {
                    if let Err(e) = joined {
                        tracing::error!(%peer, "Connection task failed: {}", e);
                    }
                }
                _ = self.shutdown.changed() => {
                    in_flight = Some(task);
                    break;
                }
            }
        }

        drop(listener);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.released.send(());
        tracing::debug!("Listening socket released");

        if let Some(task) = in_flight {
            tracing::debug!("Letting the in-flight connection finish");
            if let Err(e) = task.await {
                tracing::error!("Connection task failed: {}", e);
            }
        }
    }
}
