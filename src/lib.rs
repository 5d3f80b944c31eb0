//! Granblue Proxy library
//!
//! A forward HTTP proxy restricted to the game's hosts, with CONNECT tunnelling
//! and a cache in front of static asset hosts.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod proxy;

// Request handling
pub mod cache;
pub mod handlers;
pub mod security;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, Result};
pub use lifecycle::{App, Shutdown};
pub use proxy::{Gateway, ProxyServer};
