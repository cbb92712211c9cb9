//! Process-wide server slot.
//!
//! Host reloads start the live-link again without a chance to clean up the
//! previous instance. Going through [`install`] stops whatever server is
//! already registered before binding a new one, so the process never holds
//! two listening sockets.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ramen_core::HostScheduler;

use crate::error::ServerResult;
use crate::listener::{LiveLinkServer, ServerHandle};
use crate::ServerConfig;

static CURRENT: Mutex<Option<ServerHandle>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<ServerHandle>> {
    CURRENT.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stop the registered server, if any, then start and register a new one.
///
/// The slot stays locked throughout, so concurrent callers are serialized. If
/// the new server fails to start the slot is left empty.
pub fn install(config: ServerConfig, scheduler: Arc<dyn HostScheduler>) -> ServerResult<SocketAddr> {
    let mut slot = slot();
    if let Some(previous) = slot.take() {
        tracing::info!("Replacing live-link server on {}", previous.local_addr());
        previous.stop();
    }

    let handle = LiveLinkServer::start(config, scheduler)?;
    let addr = handle.local_addr();
    *slot = Some(handle);
    Ok(addr)
}

/// Stop and forget the registered server. Returns whether there was one.
pub fn shutdown() -> bool {
    let mut slot = slot();
    match slot.take() {
        Some(handle) => {
            handle.stop();
            true
        }
        None => false,
    }
}

/// Address of the registered server while it is accepting.
pub fn current_addr() -> Option<SocketAddr> {
    slot()
        .as_ref()
        .filter(|handle| handle.is_running())
        .map(ServerHandle::local_addr)
}
