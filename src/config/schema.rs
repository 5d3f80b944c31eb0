//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Identity of the proxy's own static site.
    pub web: WebConfig,

    /// Response cache backends.
    pub cache: CacheConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8088").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Upper bound on a request's line plus header section.
    pub max_header_bytes: usize,

    /// Upper bound on an intercepted request body, declared or chunked.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8088".to_string(),
            max_connections: 10_000,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// The proxy's advertised hostname and what its root page points at.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    /// Requests for this host are answered locally.
    pub hostname: String,

    /// `Location` of the redirect served at `/`.
    pub redirect_url: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            redirect_url: "https://game.granbluefantasy.jp/".to_string(),
        }
    }
}

/// Cache tiers. Enabled tiers are stacked disk (innermost), redis, memory (outermost).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep an unbounded in-process tier.
    pub memory: bool,

    /// Content-hashed files on local disk.
    pub disk: DiskCacheConfig,

    /// Remote key-value store; absent means disabled.
    pub redis: Option<RedisCacheConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: false,
            disk: DiskCacheConfig::default(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiskCacheConfig {
    pub enabled: bool,

    /// Cache root directory, created on start if missing.
    pub root: String,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: "cache".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Connection URL (e.g., "redis://127.0.0.1:6379").
    pub url: String,

    /// Fixed expiration applied to every stored entry.
    pub expiration_secs: u64,

    /// Maximum pooled connections.
    pub pool_size: u32,

    /// Prepended to every cache key.
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            expiration_secs: 86_400,
            pool_size: 16,
            key_prefix: String::new(),
        }
    }
}

/// Timeout configuration for various operations.
///
/// A value of 0 disables the corresponding deadline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Live-fetch deadline (request sent to response headers) in seconds.
    pub request_secs: u64,

    /// Per-read idle deadline inside tunnels in seconds.
    pub idle_secs: u64,

    /// How long shutdown waits for active connections in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 0,
            idle_secs: 0,
            shutdown_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        non_zero_secs(self.connect_secs)
    }

    pub fn request(&self) -> Option<Duration> {
        non_zero_secs(self.request_secs)
    }

    pub fn idle(&self) -> Option<Duration> {
        non_zero_secs(self.idle_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "granblue_proxy=info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
