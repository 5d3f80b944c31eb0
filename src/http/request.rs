//! Parsed requests and the request normalizer.
//!
//! # Responsibilities
//! - Represent a request the way it arrived: method, target URL, header multimap, `Host`
//! - Fill missing URL parts so every request has scheme, host and path
//! - Merge a CONNECT request with the request tunneled inside it
//! - Replay the request head onto an outbound connection
//!
//! # Design Decisions
//! - Path and query are kept in their on-the-wire form; nothing is decoded or reordered
//! - `Host` is stored apart from the header map and always written first

use std::str::FromStr;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, Uri, Version};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, Result};

pub const SCHEME_HTTP: &str = "http";
pub const SCHEME_HTTPS: &str = "https";

/// Target URL of a request, split into the pieces the proxy routes on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestUrl {
    pub scheme: String,
    /// Authority as received: `host`, `host:port` or `[v6]:port`.
    pub host: String,
    pub path: String,
    pub raw_query: String,
    /// A `?` was present with nothing after it.
    pub force_query: bool,
}

impl RequestUrl {
    /// Decompose a request target (origin, absolute, authority or asterisk form).
    pub fn parse(target: &str) -> Result<Self> {
        let uri = Uri::from_str(target)
            .map_err(|e| ProxyError::Parse(format!("invalid request target '{}': {}", target, e)))?;

        let mut url = RequestUrl {
            scheme: uri.scheme_str().unwrap_or_default().to_string(),
            host: uri.authority().map(|a| a.as_str().to_string()).unwrap_or_default(),
            ..Default::default()
        };
        if let Some(pq) = uri.path_and_query() {
            url.path = pq.path().to_string();
            match pq.query() {
                Some("") => url.force_query = true,
                Some(query) => url.raw_query = query.to_string(),
                None => {}
            }
        }
        Ok(url)
    }

    /// Host without port or IPv6 brackets.
    pub fn hostname(&self) -> &str {
        let host = self.host.as_str();
        if let Some(rest) = host.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }
        match host.rsplit_once(':') {
            Some((name, _)) => name,
            None => host,
        }
    }

    /// Explicit port, if the authority carries one.
    pub fn port(&self) -> Option<&str> {
        let host = self.host.as_str();
        let after_host = match host.rfind(']') {
            Some(idx) => &host[idx + 1..],
            None => host,
        };
        after_host
            .rsplit_once(':')
            .map(|(_, port)| port)
            .filter(|port| !port.is_empty())
    }

    pub fn is_plaintext(&self) -> bool {
        self.scheme == SCHEME_HTTP
    }

    /// `host:port` to dial, with 80 for plaintext and 443 otherwise.
    pub fn dial_address(&self) -> (String, u16) {
        let default_port = if self.is_plaintext() { 80 } else { 443 };
        let port = self
            .port()
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);
        (self.hostname().to_string(), port)
    }

    /// Path plus query, as sent in an origin-form request line.
    pub fn request_target(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        if !self.raw_query.is_empty() {
            format!("{}?{}", path, self.raw_query)
        } else if self.force_query {
            format!("{}?", path)
        } else {
            path.to_string()
        }
    }

    /// Full absolute URL.
    pub fn absolute(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.request_target())
    }
}

impl std::fmt::Display for RequestUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() && self.raw_query.is_empty() {
            write!(f, "{}://{}", self.scheme, self.host)
        } else {
            f.write_str(&self.absolute())
        }
    }
}

/// A request read off a client connection.
///
/// The body starts empty; the gateway reads it from the connection only when
/// the request is intercepted, otherwise it stays in the stream for the tunnel.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: RequestUrl,
    /// Literal `Host` value; removed from `headers`.
    pub host: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for ProxyRequest {
    fn default() -> Self {
        Self {
            method: Method::GET,
            url: RequestUrl::default(),
            host: String::new(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl ProxyRequest {
    /// Build from parsed request-line pieces and headers.
    pub fn from_parts(
        method: Method,
        target: &str,
        version: Version,
        mut headers: HeaderMap,
    ) -> Result<Self> {
        let url = RequestUrl::parse(target)?;
        let header_host = headers
            .remove(header::HOST)
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .unwrap_or_default();
        let host = if url.host.is_empty() {
            header_host
        } else {
            url.host.clone()
        };
        Ok(Self {
            method,
            url,
            host,
            version,
            headers,
            body: Bytes::new(),
        })
    }

    /// Request an absolute URL, mostly for tests and local handlers.
    pub fn get(url: &str) -> Result<Self> {
        let req = Self::from_parts(Method::GET, url, Version::HTTP_11, HeaderMap::new())?;
        Ok(normalize(req))
    }

    /// Whether the client asked to keep the connection open.
    pub fn wants_keep_alive(&self) -> bool {
        [header::CONNECTION.as_str(), "proxy-connection"]
            .iter()
            .flat_map(|name| self.headers.get_all(*name))
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("keep-alive"))
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Write request line and headers in origin-form.
    ///
    /// The body is not written; for tunnels it still sits in the client stream.
    pub async fn write_head<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(self.method.as_str().as_bytes());
        head.push(b' ');
        head.extend_from_slice(self.url.request_target().as_bytes());
        head.push(b' ');
        head.extend_from_slice(version_str(self.version).as_bytes());
        head.extend_from_slice(b"\r\nhost: ");
        head.extend_from_slice(self.host.as_bytes());
        head.extend_from_slice(b"\r\n");
        write_headers(&mut head, &self.headers);
        head.extend_from_slice(b"\r\n");
        writer.write_all(&head).await?;
        writer.flush().await
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

pub(crate) fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Fill defaults so scheme, host and path are never empty.
///
/// Scheme defaults to `http` unless the URL names port 443. Whichever of
/// `Host` and the URL host is empty is filled from the other, `Host` first.
pub fn normalize(mut req: ProxyRequest) -> ProxyRequest {
    if req.url.path.is_empty() {
        req.url.path = "/".to_string();
    }
    if req.url.scheme.is_empty() {
        req.url.scheme = if req.url.port() == Some("443") {
            SCHEME_HTTPS.to_string()
        } else {
            SCHEME_HTTP.to_string()
        };
    }
    if req.host.is_empty() {
        req.host = req.url.host.clone();
    } else if req.url.host.is_empty() {
        req.url.host = req.host.clone();
    }
    req
}

/// Overlay `source` (the tunneled request) onto `target` (the CONNECT request).
///
/// Host and scheme are taken when present. Path, query and the empty-query flag
/// move together when the source path is non-empty. Headers and body are replaced.
pub fn merge(mut target: ProxyRequest, source: ProxyRequest) -> ProxyRequest {
    target.method = source.method;
    if !source.url.host.is_empty() {
        target.url.host = source.url.host;
    }
    if !source.url.scheme.is_empty() {
        target.url.scheme = source.url.scheme;
    }
    if !source.url.path.is_empty() {
        target.url.path = source.url.path;
        target.url.raw_query = source.url.raw_query;
        target.url.force_query = source.url.force_query;
    }
    target.version = source.version;
    target.headers = source.headers;
    target.body = source.body;
    target
}

/// Value of a header as text, if present and visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v: &HeaderValue| v.to_str().ok())
}
