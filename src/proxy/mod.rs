//! Proxy core.
//!
//! # Data Flow
//! ```text
//! server.rs (accept, spawn per connection)
//!     → net::ConnectionHandler (span, socket close)
//!     → gateway.rs (CONNECT, allow-list, tunnel vs intercept)
//!         → net::Pipe                      (tunnel)
//!         → handlers::Router → chain       (intercept)
//! ```
//!
//! # Design Decisions
//! - The gateway is shared by every connection and holds no per-connection state
//! - Per-connection state lives on the task's stack inside `Gateway::forward`

pub mod gateway;
pub mod server;

pub use gateway::Gateway;
pub use server::ProxyServer;
