//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the configured cache backends and start them
//! - Compose the handler chain and the gateway
//! - Bind the listener last, once everything behind it is ready
//! - Shut the cache backends down after the accept loop drains
//!
//! # Design Decisions
//! - Fail fast: a backend that cannot start is fatal, nothing is accepted
//! - Tiers are layered innermost-first (disk, then redis, then memory)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::cache::{
    CacheBackend, CacheError, DiskCache, MemoryCache, MsgpackSerializer, RemoteCache,
    Serializer, Sha256Hasher,
};
use crate::config::{CacheConfig, ProxyConfig};
use crate::error::ProxyError;
use crate::handlers::{CacheHandler, LiveFetchHandler, RequestHandler, Router, WebHandler};
use crate::lifecycle::Shutdown;
use crate::net::{BufferPool, ListenerError, Listener, Pipe, TcpConnector};
use crate::proxy::{Gateway, ProxyServer};
use crate::security::AccessControl;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cache backend '{backend}' failed to start: {source}")]
    Cache {
        backend: &'static str,
        #[source]
        source: CacheError,
    },

    #[error("invalid web settings: {0}")]
    Web(#[source] ProxyError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Backends named by the config, innermost tier first.
pub fn build_backends(config: &CacheConfig) -> Vec<Arc<dyn CacheBackend>> {
    let mut backends: Vec<Arc<dyn CacheBackend>> = Vec::new();
    if config.disk.enabled {
        backends.push(Arc::new(DiskCache::new(
            &config.disk.root,
            Arc::new(Sha256Hasher),
        )));
    }
    if let Some(redis) = &config.redis {
        backends.push(Arc::new(RemoteCache::new(redis.clone())));
    }
    if config.memory {
        backends.push(Arc::new(MemoryCache::new()));
    }
    backends
}

/// Start every backend in order. On failure the ones already started are shut down.
pub async fn start_backends(backends: &[Arc<dyn CacheBackend>]) -> Result<(), StartupError> {
    for (i, backend) in backends.iter().enumerate() {
        if let Err(source) = backend.start().await {
            shutdown_backends(&backends[..i]).await;
            return Err(StartupError::Cache {
                backend: backend.name(),
                source,
            });
        }
        info!(backend = backend.name(), "Cache backend started");
    }
    Ok(())
}

/// Shut down every backend, outermost first. Failures are logged only.
pub async fn shutdown_backends(backends: &[Arc<dyn CacheBackend>]) {
    for backend in backends.iter().rev() {
        match backend.shutdown().await {
            Ok(()) => info!(backend = backend.name(), "Cache backend stopped"),
            Err(e) => error!(backend = backend.name(), error = %e, "Cache backend shutdown failed"),
        }
    }
}

/// Live fetch wrapped by one cache decorator per backend, behind the router.
pub fn build_chain(
    config: &ProxyConfig,
    access: Arc<AccessControl>,
    backends: &[Arc<dyn CacheBackend>],
) -> Result<Arc<dyn RequestHandler>, StartupError> {
    let serializer: Arc<dyn Serializer> = Arc::new(MsgpackSerializer);
    let mut proxy: Arc<dyn RequestHandler> = Arc::new(LiveFetchHandler::new(&config.timeouts));
    for backend in backends {
        proxy = Arc::new(CacheHandler::new(
            Arc::clone(backend),
            Arc::clone(&serializer),
            Arc::clone(&access),
            proxy,
        ));
    }
    let web = Arc::new(WebHandler::new(&config.web).map_err(StartupError::Web)?);
    Ok(Arc::new(Router::new(access, proxy, web)))
}

/// A fully started proxy that has not begun accepting yet.
pub struct App {
    server: ProxyServer,
    backends: Vec<Arc<dyn CacheBackend>>,
}

impl App {
    /// Start backends, build the gateway and bind the listener.
    pub async fn build(config: &ProxyConfig) -> Result<Self, StartupError> {
        let backends = build_backends(&config.cache);
        start_backends(&backends).await?;

        match Self::assemble(config, &backends).await {
            Ok(server) => Ok(Self { server, backends }),
            Err(e) => {
                shutdown_backends(&backends).await;
                Err(e)
            }
        }
    }

    async fn assemble(
        config: &ProxyConfig,
        backends: &[Arc<dyn CacheBackend>],
    ) -> Result<ProxyServer, StartupError> {
        let access = Arc::new(AccessControl::new());
        let router = build_chain(config, Arc::clone(&access), backends)?;
        let gateway = Gateway::new(
            access,
            router,
            Arc::new(TcpConnector::new(config.timeouts.connect())),
            Pipe::new(Arc::new(BufferPool::default()), config.timeouts.idle()),
            config.listener.max_header_bytes,
            config.listener.max_body_bytes,
        );
        let listener = Listener::bind(&config.listener).await?;
        Ok(ProxyServer::new(
            listener,
            Arc::new(gateway),
            config.timeouts.shutdown(),
        ))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Serve until `shutdown` fires, then drain and stop the backends.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let served = self.server.run(shutdown).await;
        shutdown_backends(&self.backends).await;
        served?;
        info!("Shutdown complete");
        Ok(())
    }
}
