//! Buffered request reader over a raw client stream.
//!
//! Requests are parsed from an internal buffer that is filled on demand. Bytes
//! read past the end of a request head stay buffered and are served first by
//! the `AsyncRead` impl, so a tunnel started after parsing loses nothing.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Version};
use tokio::io::{self, AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::{ProxyError, Result};
use crate::http::request::{header_str, ProxyRequest};

const INITIAL_CAPACITY: usize = 4 * 1024;
const MAX_HEADERS: usize = 96;

/// Reads HTTP/1.x requests from a stream while keeping read-ahead bytes.
pub struct RequestReader<R> {
    inner: R,
    buf: BytesMut,
    max_header_bytes: usize,
    max_body_bytes: usize,
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
    pub fn new(inner: R, max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_header_bytes,
            max_body_bytes,
        }
    }

    /// Bytes read from the stream but not consumed yet.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..]
    }

    async fn fill(&mut self) -> Result<usize> {
        let n = self.inner.read_buf(&mut self.buf).await?;
        Ok(n)
    }

    /// Read one request line and header section.
    ///
    /// Returns [`ProxyError::Eof`] when the stream ends before any byte of a
    /// new request arrives.
    pub async fn read_request(&mut self) -> Result<ProxyRequest> {
        loop {
            if let Some((len, request)) = parse_head(&self.buf)? {
                if len > self.max_header_bytes {
                    return Err(ProxyError::HeaderTooLarge {
                        limit: self.max_header_bytes,
                    });
                }
                self.buf.advance(len);
                return Ok(request);
            }
            if self.buf.len() >= self.max_header_bytes {
                return Err(ProxyError::HeaderTooLarge {
                    limit: self.max_header_bytes,
                });
            }
            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    Err(ProxyError::Eof)
                } else {
                    Err(ProxyError::Parse("stream ended inside request head".into()))
                };
            }
        }
    }

    /// Read the body framed by `headers`, decoding chunked transfer coding.
    ///
    /// A declared length or a chunked total over the body limit fails with
    /// [`ProxyError::BodyTooLarge`] before the excess is buffered.
    pub async fn read_body(&mut self, headers: &HeaderMap) -> Result<Bytes> {
        if is_chunked(headers) {
            return self.read_chunked().await;
        }
        match header_str(headers, header::CONTENT_LENGTH.as_str()) {
            Some(value) => {
                let len: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| ProxyError::Parse(format!("invalid content-length '{}'", value)))?;
                self.check_body_len(len)?;
                self.read_exact_bytes(len).await
            }
            None => Ok(Bytes::new()),
        }
    }

    fn check_body_len(&self, len: usize) -> Result<()> {
        if len > self.max_body_bytes {
            return Err(ProxyError::BodyTooLarge {
                limit: self.max_body_bytes,
            });
        }
        Ok(())
    }

    async fn read_exact_bytes(&mut self, len: usize) -> Result<Bytes> {
        while self.buf.len() < len {
            if self.fill().await? == 0 {
                return Err(ProxyError::Parse("stream ended inside request body".into()));
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_line(&mut self) -> Result<Bytes> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos).freeze();
                self.buf.advance(2);
                return Ok(line);
            }
            if self.buf.len() >= self.max_header_bytes {
                return Err(ProxyError::HeaderTooLarge {
                    limit: self.max_header_bytes,
                });
            }
            if self.fill().await? == 0 {
                return Err(ProxyError::Parse("stream ended inside chunked body".into()));
            }
        }
    }

    async fn read_chunked(&mut self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let mut sized = line.to_vec();
            sized.extend_from_slice(b"\r\n");
            let size = match httparse::parse_chunk_size(&sized) {
                Ok(httparse::Status::Complete((_, size))) => size as usize,
                _ => return Err(ProxyError::Parse("invalid chunk size line".into())),
            };
            if size == 0 {
                // Trailer section, discarded.
                while !self.read_line().await?.is_empty() {}
                return Ok(body.freeze());
            }
            self.check_body_len(body.len().saturating_add(size))?;
            let chunk = self.read_exact_bytes(size).await?;
            body.extend_from_slice(&chunk);
            if !self.read_line().await?.is_empty() {
                return Err(ProxyError::Parse("missing CRLF after chunk".into()));
            }
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for RequestReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if out.remaining() == 0 {
            Poll::Ready(Ok(()))
        } else if !self.buf.is_empty() {
            let n = self.buf.len().min(out.remaining());
            let chunk = self.buf.split_to(n);
            out.put_slice(&chunk);
            Poll::Ready(Ok(()))
        } else {
            Pin::new(&mut self.inner).poll_read(cx, out)
        }
    }
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
}

/// Parse a request head from `buf`; `None` while incomplete.
fn parse_head(buf: &[u8]) -> Result<Option<(usize, ProxyRequest)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(buf)? {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(len) => len,
    };

    let method = req
        .method
        .map(|m| Method::from_bytes(m.as_bytes()))
        .transpose()
        .map_err(|e| ProxyError::Parse(e.to_string()))?
        .unwrap_or(Method::GET);
    let target = req
        .path
        .ok_or_else(|| ProxyError::Parse("missing request target".into()))?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut map = HeaderMap::with_capacity(req.headers.len());
    for h in req.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| ProxyError::Parse(format!("invalid header name '{}': {}", h.name, e)))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| ProxyError::Parse(format!("invalid value for '{}': {}", h.name, e)))?;
        map.append(name, value);
    }

    let request = ProxyRequest::from_parts(method, target, version, map)?;
    Ok(Some((len, request)))
}
