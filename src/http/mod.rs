//! HTTP/1.x wire handling.
//!
//! # Data Flow
//! ```text
//! raw client stream
//!     → reader.rs (buffered head parse, body framing, read-ahead kept)
//!     → request.rs (ProxyRequest, normalize, merge for CONNECT)
//!     → [gateway decides tunnel or intercept]
//!     → response.rs (spool body, write status line + headers + body)
//!     → client stream
//! ```
//!
//! # Design Decisions
//! - Client-facing HTTP is parsed by hand with `httparse`; the raw stream must stay
//!   available for tunneling after the first request
//! - Only the live-fetch client speaks HTTP through hyper

pub mod reader;
pub mod request;
pub mod response;

pub use reader::RequestReader;
pub use request::{merge, normalize, ProxyRequest, RequestUrl};
pub use response::{ProxyResponse, ResponseBody, ResponseBuilder, X_PROXY_SERVER};
