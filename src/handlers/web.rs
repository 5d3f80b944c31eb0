//! The proxy's own tiny site, and the refusal page for every other host.

use async_trait::async_trait;
use http::{header, HeaderValue, StatusCode};
use tracing::info;

use crate::config::WebConfig;
use crate::error::{ProxyError, Result};
use crate::handlers::RequestHandler;
use crate::http::response::forbidden;
use crate::http::{ProxyRequest, ProxyResponse, ResponseBuilder};

/// Answers locally; never opens an outbound connection.
#[derive(Debug)]
pub struct WebHandler {
    hostname: String,
    location: HeaderValue,
}

impl WebHandler {
    pub fn new(config: &WebConfig) -> Result<Self> {
        let location = HeaderValue::from_str(&config.redirect_url).map_err(|e| {
            ProxyError::InvalidRequest(format!(
                "redirect url '{}' is not a valid header: {}",
                config.redirect_url, e
            ))
        })?;
        Ok(Self {
            hostname: config.hostname.clone(),
            location,
        })
    }
}

#[async_trait]
impl RequestHandler for WebHandler {
    async fn handle(&self, req: ProxyRequest) -> Result<ProxyResponse> {
        let host = req.url.hostname();
        if host != self.hostname {
            info!(request = %req.summary(), "Denying request to host outside allow-list");
            return Ok(forbidden(format!(
                "Target host {} is not allowed to be accessed via this proxy",
                host
            )));
        }
        if req.url.path == "/" {
            return Ok(ResponseBuilder::new(StatusCode::FOUND)
                .header(header::LOCATION, self.location.clone())
                .build());
        }
        Ok(ResponseBuilder::new(StatusCode::NOT_FOUND)
            .text("404 Not Found")
            .build())
    }
}
