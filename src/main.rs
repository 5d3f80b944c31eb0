//! Granblue Proxy
//!
//! Forward HTTP proxy for the game's hosts.
//!
//! # Architecture Overview
//!
//! ```text
//!     Browser ──▶ net::Listener ──▶ net::ConnectionHandler ──▶ proxy::Gateway
//!                                                                 │
//!                    ┌────────────── allowed && (https || !asset) ┤
//!                    ▼                                            ▼ otherwise
//!               net::Pipe ◀──▶ origin              handlers::Router
//!                                                   ├─ allowed → cache tiers → live fetch ──▶ origin
//!                                                   └─ other   → web (302 / 403 / 404)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use granblue_proxy::config::{load_config, validation::validate_config, ProxyConfig, RedisCacheConfig};
use granblue_proxy::lifecycle::{spawn_signal_handler, App, Shutdown};
use granblue_proxy::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser, Debug)]
#[command(name = "granblue-proxy", version, about = "Caching forward proxy for Granblue Fantasy")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8088
    #[arg(short, long)]
    listen: Option<String>,

    /// Hostname the proxy's own site answers to
    #[arg(long)]
    web_hostname: Option<String>,

    /// Disk cache root directory
    #[arg(long)]
    cache_dir: Option<String>,

    /// Disable the disk cache
    #[arg(long)]
    no_disk_cache: bool,

    /// Redis URL for the shared cache tier
    #[arg(long)]
    redis: Option<String>,

    /// Add an in-memory cache tier
    #[arg(long)]
    memory_cache: bool,
}

impl Args {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(hostname) = &self.web_hostname {
            config.web.hostname = hostname.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.disk.root = dir.clone();
        }
        if self.no_disk_cache {
            config.cache.disk.enabled = false;
        }
        if let Some(url) = &self.redis {
            let redis = config.cache.redis.get_or_insert_with(RedisCacheConfig::default);
            redis.url = url.clone();
        }
        if self.memory_cache {
            config.cache.memory = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };
    args.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in errors {
            eprintln!("invalid configuration: {}", error);
        }
        return ExitCode::FAILURE;
    }

    init_logging(&config.observability.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "granblue-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        web_hostname = %config.web.hostname,
        memory_cache = config.cache.memory,
        disk_cache = config.cache.disk.enabled,
        redis_cache = config.cache.redis.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = match App::build(&config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };
    if let Ok(address) = app.local_addr() {
        tracing::info!(%address, "Proxy listening");
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    match app.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Proxy stopped with an error");
            ExitCode::FAILURE
        }
    }
}
