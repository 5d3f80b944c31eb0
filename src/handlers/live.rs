//! Live fetch from the origin.
//!
//! # Responsibilities
//! - Rebuild the intercepted request for the hyper client
//! - Drop hop-by-hop headers so the client connection's framing never leaks upstream
//! - Hand back the origin response unread, redirects included
//!
//! # Design Decisions
//! - The legacy client never follows redirects; they reach the browser as-is
//! - Only plain `http` origins are dialed; intercepted traffic is plaintext by construction

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri};
use http_body_util::Full;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::config::TimeoutConfig;
use crate::error::{ProxyError, Result};
use crate::handlers::RequestHandler;
use crate::http::{ProxyRequest, ProxyResponse};

/// Headers that describe one connection rather than the request.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Fetches intercepted requests from their origin.
#[derive(Clone)]
pub struct LiveFetchHandler {
    client: Client<HttpConnector, Full<Bytes>>,
    request_timeout: Option<Duration>,
}

impl LiveFetchHandler {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(timeouts.connect());
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            request_timeout: timeouts.request(),
        }
    }

    fn outbound(&self, req: ProxyRequest) -> Result<Request<Full<Bytes>>> {
        let target = req.url.absolute();
        let uri = Uri::from_str(&target)
            .map_err(|e| ProxyError::InvalidRequest(format!("bad url '{}': {}", target, e)))?;

        let mut builder = Request::builder().method(req.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = end_to_end(req.headers);
            let host = HeaderValue::from_str(&req.host)
                .map_err(|e| ProxyError::InvalidRequest(format!("bad host '{}': {}", req.host, e)))?;
            headers.insert(header::HOST, host);
        }
        Ok(builder.body(Full::new(req.body))?)
    }
}

#[async_trait]
impl RequestHandler for LiveFetchHandler {
    async fn handle(&self, req: ProxyRequest) -> Result<ProxyResponse> {
        let summary = req.summary();
        let outbound = self.outbound(req)?;

        let pending = self.client.request(outbound);
        let response = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| ProxyError::Timeout(limit))??,
            None => pending.await?,
        };

        debug!(request = %summary, status = %response.status(), "Origin responded");
        Ok(ProxyResponse::from_upstream(response))
    }
}

/// Strip hop-by-hop headers, including any named by `Connection`.
fn end_to_end(mut headers: HeaderMap) -> HeaderMap {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}
