//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request (hostname, port stripped)
//!     → access_control.rs is_allowed  → deny: 403, never dialed
//!     → access_control.rs is_asset    → intercept and cache, else tunnel
//! ```
//!
//! # Design Decisions
//! - Fail closed: a host that matches no rule is denied
//! - The rules are literal constants for the game's fixed domains

pub mod access_control;

pub use access_control::AccessControl;
