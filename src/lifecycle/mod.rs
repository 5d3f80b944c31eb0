//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Build cache backends → start them (fatal) → handler chain → gateway → bind
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → drain connections → stop cache backends
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: caches first, listener last (traffic only when ready)
//! - Draining has a deadline; leftover connections are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
pub use startup::{App, StartupError};
