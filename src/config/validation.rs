//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for values the proxy cannot run with.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &'static str, message: String| {
        errors.push(ValidationError { field, message });
    };

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        fail(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        );
    }
    if config.listener.max_connections == 0 {
        fail("listener.max_connections", "must be greater than 0".into());
    }
    if config.listener.max_header_bytes < 1024 {
        fail("listener.max_header_bytes", "must be at least 1024".into());
    }
    if config.listener.max_body_bytes == 0 {
        fail("listener.max_body_bytes", "must be greater than 0".into());
    }
    if config.web.hostname.trim().is_empty() {
        fail("web.hostname", "must not be empty".into());
    }
    if config.cache.disk.enabled && config.cache.disk.root.trim().is_empty() {
        fail("cache.disk.root", "must not be empty when the disk cache is enabled".into());
    }
    if let Some(redis) = &config.cache.redis {
        if redis.url.trim().is_empty() {
            fail("cache.redis.url", "must not be empty".into());
        }
        if redis.expiration_secs == 0 {
            fail("cache.redis.expiration_secs", "must be greater than 0".into());
        }
        if redis.pool_size == 0 {
            fail("cache.redis.pool_size", "must be greater than 0".into());
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        fail(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RedisCacheConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.listener.max_connections = 0;
        config.web.hostname = " ".into();
        config.cache.redis = Some(RedisCacheConfig {
            expiration_secs: 0,
            ..Default::default()
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.max_connections",
                "web.hostname",
                "cache.redis.expiration_secs",
            ]
        );
    }

    #[test]
    fn rejects_zero_body_limit() {
        let mut config = ProxyConfig::default();
        config.listener.max_body_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "listener.max_body_bytes");
    }
}
