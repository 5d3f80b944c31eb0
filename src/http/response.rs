//! Response model and wire writer.
//!
//! # Responsibilities
//! - Hold live responses (streamed from the origin) and locally built ones alike
//! - Spool a streamed body into memory exactly once
//! - Serialize status line, headers and body back onto the client connection
//!
//! # Design Decisions
//! - Bodies are always written with a `Content-Length`; transfer codings are undone when spooling
//! - Every locally built response carries `X-Proxy-Server`
//! - A 2xx answer to CONNECT carries no framing headers at all

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::http::request::{header_str, version_str, write_headers, ProxyRequest};

/// Value of the `X-Proxy-Server` header.
pub const PROXY_SERVER: &str = concat!("Granblue Proxy ", env!("CARGO_PKG_VERSION"));

pub const X_PROXY_SERVER: HeaderName = HeaderName::from_static("x-proxy-server");

/// Body of a [`ProxyResponse`].
#[derive(Debug)]
pub enum ResponseBody {
    /// Fully materialized bytes.
    Full(Bytes),
    /// Still arriving from the origin.
    Stream(Incoming),
}

/// A response headed for the client.
#[derive(Debug)]
pub struct ProxyResponse {
    pub version: Version,
    pub status: StatusCode,
    /// Reason phrase as received; `None` falls back to the canonical one.
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    /// Declared length, `-1` when unknown.
    pub content_length: i64,
    pub transfer_encoding: Vec<String>,
    pub trailers: HeaderMap,
    pub uncompressed: bool,
}

impl ProxyResponse {
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// Wrap a response from the live-fetch client without reading its body.
    pub fn from_upstream(res: http::Response<Incoming>) -> Self {
        let reason = res
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned());
        let (parts, body) = res.into_parts();

        let content_length = header_str(&parts.headers, header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(-1);
        let transfer_encoding = parts
            .headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            version: parts.version,
            status: parts.status,
            reason,
            headers: parts.headers,
            body: ResponseBody::Stream(body),
            content_length,
            transfer_encoding,
            trailers: HeaderMap::new(),
            uncompressed: false,
        }
    }

    /// Reason phrase to put on the status line.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    /// `"200 OK"` style status text.
    pub fn status_text(&self) -> String {
        format!("{} {}", self.status.as_u16(), self.reason())
    }

    /// Read a streamed body to the end, keeping its trailers.
    ///
    /// Does nothing when the body is already in memory.
    pub async fn spool(&mut self) -> Result<Bytes> {
        let bytes = match std::mem::replace(&mut self.body, ResponseBody::Full(Bytes::new())) {
            ResponseBody::Full(bytes) => bytes,
            ResponseBody::Stream(incoming) => {
                let collected = incoming.collect().await?;
                if let Some(trailers) = collected.trailers() {
                    self.trailers = trailers.clone();
                }
                collected.to_bytes()
            }
        };
        self.body = ResponseBody::Full(bytes.clone());
        Ok(bytes)
    }

    /// Body bytes if already spooled.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Full(bytes) => Some(bytes),
            ResponseBody::Stream(_) => None,
        }
    }

    /// Write this response as the answer to `request`.
    ///
    /// The status line uses the request's HTTP version. The body is spooled
    /// first, so a failing origin is reported before any byte is written.
    pub async fn write_to<W>(
        &mut self,
        writer: &mut W,
        request: &ProxyRequest,
        keep_alive: bool,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let body = self.spool().await?;
        let tunnel_established = request.method == Method::CONNECT && self.status.is_success();
        let head_only = request.method == Method::HEAD || !status_allows_body(self.status);

        let mut headers = self.headers.clone();
        headers.remove(header::CONNECTION);
        headers.remove("keep-alive");
        if tunnel_established {
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
        } else {
            if headers.remove(header::TRANSFER_ENCODING).is_some()
                || !self.transfer_encoding.is_empty()
            {
                headers.remove(header::TRAILER);
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
            } else if !headers.contains_key(header::CONTENT_LENGTH)
                && status_allows_body(self.status)
                && request.method != Method::HEAD
            {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
            }
            headers.insert(
                header::CONNECTION,
                HeaderValue::from_static(if keep_alive { "keep-alive" } else { "close" }),
            );
        }

        let mut out = Vec::with_capacity(256 + body.len());
        out.extend_from_slice(version_str(request.version).as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status_text().as_bytes());
        out.extend_from_slice(b"\r\n");
        write_headers(&mut out, &headers);
        out.extend_from_slice(b"\r\n");
        if !head_only && !tunnel_established {
            out.extend_from_slice(&body);
        }
        writer.write_all(&out).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Builder for locally generated responses.
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(X_PROXY_SERVER, HeaderValue::from_static(PROXY_SERVER));
        Self {
            status,
            reason: None,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Plain-text body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body = Bytes::from(body.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> ProxyResponse {
        ProxyResponse {
            version: Version::HTTP_11,
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            content_length: self.body.len() as i64,
            body: ResponseBody::Full(self.body),
            transfer_encoding: Vec::new(),
            trailers: HeaderMap::new(),
            uncompressed: false,
        }
    }
}

/// `200 Connection Established`, the answer to an accepted CONNECT.
pub fn connection_established() -> ProxyResponse {
    ResponseBuilder::new(StatusCode::OK)
        .reason("Connection Established")
        .build()
}

/// `403 Forbidden` naming the refused host.
pub fn forbidden(message: impl Into<String>) -> ProxyResponse {
    ResponseBuilder::new(StatusCode::FORBIDDEN).text(message).build()
}

/// `502 Bad Gateway` written when an intercepted request fails.
pub fn bad_gateway() -> ProxyResponse {
    ResponseBuilder::new(StatusCode::BAD_GATEWAY)
        .text("The proxy could not complete the request to the origin server")
        .build()
}
