//! Error taxonomy for the proxy core.
//!
//! # Design Decisions
//! - Protocol errors (`Parse`, `HeaderTooLarge`, `BodyTooLarge`) drop the connection without a response
//! - Upstream errors are answered with a 502 only while nothing has been written yet
//! - Policy denials are not errors at all; they produce a well-formed 403

use std::io;

use crate::cache::CacheError;

/// Errors raised while serving a single proxied connection.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Malformed request line, headers or body framing.
    #[error("malformed request: {0}")]
    Parse(String),

    /// The request header section did not fit in the read buffer.
    #[error("request header section exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// The request body is larger than the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The peer closed the connection before a complete request arrived.
    #[error("connection closed by peer")]
    Eof,

    /// Dialing the origin for a tunnel failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The live-fetch client could not complete the exchange.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// Reading the upstream response body failed.
    #[error("upstream body read failed: {0}")]
    UpstreamBody(#[from] hyper::Error),

    /// The live-fetch deadline elapsed.
    #[error("upstream request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The outbound request could not be assembled.
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// True when the error only means the peer went away.
    pub fn is_eof(&self) -> bool {
        match self {
            ProxyError::Eof => true,
            ProxyError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

impl From<httparse::Error> for ProxyError {
    fn from(e: httparse::Error) -> Self {
        ProxyError::Parse(e.to_string())
    }
}

impl From<http::Error> for ProxyError {
    fn from(e: http::Error) -> Self {
        ProxyError::InvalidRequest(e.to_string())
    }
}

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
