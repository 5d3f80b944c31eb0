//! Accept loop.
//!
//! # Responsibilities
//! - Take connections off the listener while a slot is free
//! - Spawn one task per connection, holding its permit and tracker guard
//! - Stop accepting on shutdown and drain open connections up to a deadline

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::lifecycle::Shutdown;
use crate::net::{ConnectionHandler, ConnectionTracker, Listener, ListenerError};
use crate::proxy::Gateway;

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct ProxyServer {
    listener: Listener,
    handler: ConnectionHandler,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl ProxyServer {
    pub fn new(listener: Listener, gateway: Arc<Gateway>, drain_timeout: Duration) -> Self {
        Self {
            listener,
            handler: ConnectionHandler::new(gateway),
            tracker: ConnectionTracker::new(),
            drain_timeout,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires, then wait for open connections to finish.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ListenerError> {
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            handler.handle(stream, peer, guard.id()).await;
                            drop(guard);
                            drop(permit);
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        let open = self.tracker.active_count();
        if open > 0 {
            info!(open, timeout = ?self.drain_timeout, "Draining connections");
        }
        if tokio::time::timeout(self.drain_timeout, self.tracker.wait_idle())
            .await
            .is_err()
        {
            warn!(
                open = self.tracker.active_count(),
                "Drain deadline passed with connections still open"
            );
        }
        Ok(())
    }
}
