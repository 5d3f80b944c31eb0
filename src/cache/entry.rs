//! Serializable snapshot of a cached response.

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use serde::{Deserialize, Serialize};

use crate::http::request::{version_str, RequestUrl};
use crate::http::response::{ProxyResponse, ResponseBody};

/// Cache key for a URL: the path, plus `.` and the raw query when one is present.
///
/// The query is used verbatim, so parameter order and encoding are significant.
pub fn cache_key(url: &RequestUrl) -> String {
    if url.raw_query.is_empty() {
        url.path.clone()
    } else {
        format!("{}.{}", url.path, url.raw_query)
    }
}

/// A response with its body fully materialized.
///
/// Headers and trailers keep every value in received order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub proto: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    /// Status line text, e.g. `"200 OK"`.
    pub status: String,
    pub status_code: u16,
    pub headers: Vec<(String, Bytes)>,
    pub body: Bytes,
    /// `-1` when the origin declared no length.
    pub content_length: i64,
    pub transfer_encoding: Vec<String>,
    pub uncompressed: bool,
    pub trailer: Vec<(String, Bytes)>,
}

impl CacheEntry {
    /// Snapshot a response whose body has already been spooled to `body`.
    pub fn from_response(res: &ProxyResponse, body: Bytes) -> Self {
        let (proto_major, proto_minor) = match res.version {
            Version::HTTP_09 => (0, 9),
            Version::HTTP_10 => (1, 0),
            Version::HTTP_2 => (2, 0),
            Version::HTTP_3 => (3, 0),
            _ => (1, 1),
        };
        Self {
            proto: version_str(res.version).to_string(),
            proto_major,
            proto_minor,
            status: res.status_text(),
            status_code: res.status.as_u16(),
            headers: pairs(&res.headers),
            body,
            content_length: res.content_length,
            transfer_encoding: res.transfer_encoding.clone(),
            uncompressed: res.uncompressed,
            trailer: pairs(&res.trailers),
        }
    }

    /// Build a fresh response for one request.
    ///
    /// A stored `Access-Control-Allow-Origin` is replaced with the caller's
    /// `Origin`, or `*` when the caller sent none. Nothing else is altered.
    pub fn to_response(&self, origin: Option<&HeaderValue>) -> ProxyResponse {
        let mut headers = to_header_map(&self.headers);
        if headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
            let value = origin
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("*"));
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }

        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        let reason = self
            .status
            .split_once(' ')
            .map(|(_, reason)| reason.to_string())
            .filter(|reason| Some(reason.as_str()) != status.canonical_reason());

        ProxyResponse {
            version: match (self.proto_major, self.proto_minor) {
                (1, 0) => Version::HTTP_10,
                (0, 9) => Version::HTTP_09,
                _ => Version::HTTP_11,
            },
            status,
            reason,
            headers,
            body: ResponseBody::Full(self.body.clone()),
            content_length: self.content_length,
            transfer_encoding: self.transfer_encoding.clone(),
            trailers: to_header_map(&self.trailer),
            uncompressed: self.uncompressed,
        }
    }
}

fn pairs(headers: &HeaderMap) -> Vec<(String, Bytes)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Bytes::copy_from_slice(value.as_bytes()),
            )
        })
        .collect()
}

fn to_header_map(pairs: &[(String, Bytes)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) else {
            continue;
        };
        map.append(name, value);
    }
    map
}
