//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop permit, connection limit)
//!     → connection.rs (ConnectionId, span, tracker guard)
//!     → proxy::Gateway::forward
//!     → connector.rs + pipe.rs (only for tunnels)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection is tracked so shutdown can drain
//! - Tunnel buffers are pooled and shared by every connection

pub mod connection;
pub mod connector;
pub mod listener;
pub mod pipe;

pub use connection::{ConnectionGuard, ConnectionHandler, ConnectionId, ConnectionTracker};
pub use connector::{Connector, TcpConnector};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use pipe::{BufferPool, Pipe, PooledBuffer};
