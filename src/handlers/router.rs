//! Top of the handler chain.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::handlers::RequestHandler;
use crate::http::{ProxyRequest, ProxyResponse};
use crate::security::AccessControl;

/// Sends allowed hosts to the proxy chain and everything else to the local site.
pub struct Router {
    access: Arc<AccessControl>,
    proxy: Arc<dyn RequestHandler>,
    web: Arc<dyn RequestHandler>,
}

impl Router {
    pub fn new(
        access: Arc<AccessControl>,
        proxy: Arc<dyn RequestHandler>,
        web: Arc<dyn RequestHandler>,
    ) -> Self {
        Self { access, proxy, web }
    }
}

#[async_trait]
impl RequestHandler for Router {
    async fn handle(&self, req: ProxyRequest) -> Result<ProxyResponse> {
        if self.access.is_allowed(req.url.hostname()) {
            self.proxy.handle(req).await
        } else {
            debug!(host = req.url.hostname(), "Routing to local site");
            self.web.handle(req).await
        }
    }
}
