//! Request handler chain for intercepted traffic.
//!
//! # Data Flow
//! ```text
//! Gateway (intercept)
//!     → router.rs     allowed host? ──no──→ web.rs (302 / 404 / 403, never dials)
//!                         │ yes
//!     → cache.rs      memory tier  (optional)
//!     → cache.rs      redis tier   (optional)
//!     → cache.rs      disk tier    (optional)
//!     → live.rs       hyper client → origin
//! ```
//!
//! # Design Decisions
//! - Every stage implements [`RequestHandler`] and owns the next one as a trait object
//! - Errors propagate to the gateway, which alone decides between a 502 and a drop
//! - No handler writes to the client connection

pub mod cache;
pub mod live;
pub mod router;
pub mod web;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::{ProxyRequest, ProxyResponse};

pub use cache::CacheHandler;
pub use live::LiveFetchHandler;
pub use router::Router;
pub use web::WebHandler;

/// Turns a request into a response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, req: ProxyRequest) -> Result<ProxyResponse>;
}
