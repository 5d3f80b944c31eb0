//! Cache-populating decorator.
//!
//! # Responsibilities
//! - Serve `GET` requests for asset hosts from a cache backend when present
//! - On a miss, fetch through the inner handler and store 2xx responses
//! - Rebuild every served response from the entry for the current request
//!
//! # Design Decisions
//! - The origin body is spooled once; the same bytes feed the client and the store
//! - Stores run on a detached task; failures are logged and counted only
//! - An entry that vanishes between `has` and `get`, or no longer decodes, is a miss
//! - Stacking decorators gives tiers: an outer miss served by an inner tier is
//!   stored in the outer tier on the way back

use std::sync::Arc;

use async_trait::async_trait;
use http::{header, Method};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::cache::{cache_key, CacheBackend, CacheEntry, CacheError, Serializer};
use crate::error::Result;
use crate::handlers::RequestHandler;
use crate::http::{ProxyRequest, ProxyResponse};
use crate::observability::metrics;
use crate::security::AccessControl;

pub struct CacheHandler {
    backend: Arc<dyn CacheBackend>,
    serializer: Arc<dyn Serializer>,
    access: Arc<AccessControl>,
    inner: Arc<dyn RequestHandler>,
}

impl CacheHandler {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        serializer: Arc<dyn Serializer>,
        access: Arc<AccessControl>,
        inner: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            backend,
            serializer,
            access,
            inner,
        }
    }

    fn is_cacheable(&self, req: &ProxyRequest) -> bool {
        let host = req.url.hostname();
        req.method == Method::GET && self.access.is_allowed(host) && self.access.is_asset(host)
    }

    /// Stored entry for `key`, or `None` when it should be treated as a miss.
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        if !self.backend.has(key).await? {
            return Ok(None);
        }
        let bytes = match self.backend.get(key).await {
            Ok(bytes) => bytes,
            Err(CacheError::NotFound(_)) => {
                debug!(backend = self.backend.name(), key, "Cache entry vanished after existence check");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match self.serializer.decode(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(backend = self.backend.name(), key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    fn store_in_background(&self, key: String, entry: CacheEntry) {
        let backend = Arc::clone(&self.backend);
        let serializer = Arc::clone(&self.serializer);
        tokio::spawn(
            async move {
                let result = match serializer.encode(&entry) {
                    Ok(bytes) => backend.set(&key, bytes).await,
                    Err(e) => Err(e),
                };
                metrics::record_cache_store(backend.name(), result.is_ok());
                match result {
                    Ok(()) => info!(backend = backend.name(), key = %key, "Cache PUT"),
                    Err(e) => error!(backend = backend.name(), key = %key, error = %e, "Cache store failed"),
                }
            }
            .instrument(Span::current()),
        );
    }
}

#[async_trait]
impl RequestHandler for CacheHandler {
    async fn handle(&self, req: ProxyRequest) -> Result<ProxyResponse> {
        if !self.is_cacheable(&req) {
            return self.inner.handle(req).await;
        }
        let key = cache_key(&req.url);
        let origin = req.headers.get(header::ORIGIN).cloned();

        if let Some(entry) = self.lookup(&key).await? {
            info!(backend = self.backend.name(), key = %key, "Cache HIT");
            metrics::record_cache_lookup(self.backend.name(), true);
            return Ok(entry.to_response(origin.as_ref()));
        }
        info!(backend = self.backend.name(), key = %key, "Cache MISS");
        metrics::record_cache_lookup(self.backend.name(), false);

        let mut response = self.inner.handle(req).await?;
        if !response.status.is_success() {
            return Ok(response);
        }
        let body = response.spool().await?;
        let entry = CacheEntry::from_response(&response, body);
        let fresh = entry.to_response(origin.as_ref());
        self.store_in_background(key, entry);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use http::{HeaderValue, StatusCode};

    use super::*;
    use crate::cache::{MemoryCache, MsgpackSerializer};
    use crate::http::ResponseBuilder;

    /// Origin stand-in that counts calls and answers with a fixed status.
    struct CountingOrigin {
        calls: AtomicUsize,
        status: StatusCode,
    }

    impl CountingOrigin {
        fn new(status: StatusCode) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestHandler for CountingOrigin {
        async fn handle(&self, req: ProxyRequest) -> Result<ProxyResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResponseBuilder::new(self.status)
                .header(
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("https://origin.example"),
                )
                .body(Bytes::from(format!("body for {}", req.url.request_target())))
                .build())
        }
    }

    fn handler(
        backend: Arc<dyn CacheBackend>,
        origin: Arc<CountingOrigin>,
    ) -> CacheHandler {
        CacheHandler::new(
            backend,
            Arc::new(MsgpackSerializer),
            Arc::new(AccessControl::new()),
            origin,
        )
    }

    async fn wait_stored(backend: &dyn CacheBackend, key: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !backend.has(key).await.unwrap() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entry was never stored");
    }

    async fn body_of(mut res: ProxyResponse) -> Bytes {
        res.spool().await.unwrap()
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let backend = Arc::new(MemoryCache::new());
        let origin = CountingOrigin::new(StatusCode::OK);
        let cache = handler(backend.clone(), origin.clone());
        let url = "http://game-a1.granbluefantasy.jp/assets/x.png";

        let first = cache.handle(ProxyRequest::get(url).unwrap()).await.unwrap();
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(body_of(first).await, "body for /assets/x.png");
        assert_eq!(origin.calls(), 1);

        wait_stored(backend.as_ref(), "/assets/x.png").await;

        let second = cache.handle(ProxyRequest::get(url).unwrap()).await.unwrap();
        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(body_of(second).await, "body for /assets/x.png");
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn cached_cors_header_echoes_current_origin() {
        let backend = Arc::new(MemoryCache::new());
        let origin = CountingOrigin::new(StatusCode::OK);
        let cache = handler(backend.clone(), origin.clone());
        let url = "http://game-a.granbluefantasy.jp/css/a.css";

        cache.handle(ProxyRequest::get(url).unwrap()).await.unwrap();
        wait_stored(backend.as_ref(), "/css/a.css").await;

        let mut req = ProxyRequest::get(url).unwrap();
        req.headers
            .insert(header::ORIGIN, HeaderValue::from_static("https://game.granbluefantasy.jp"));
        let hit = cache.handle(req).await.unwrap();
        assert_eq!(
            hit.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://game.granbluefantasy.jp"
        );

        let hit = cache.handle(ProxyRequest::get(url).unwrap()).await.unwrap();
        assert_eq!(hit.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn non_asset_and_non_get_requests_bypass_cache() {
        let backend = Arc::new(MemoryCache::new());
        let origin = CountingOrigin::new(StatusCode::OK);
        let cache = handler(backend.clone(), origin.clone());

        for _ in 0..2 {
            cache
                .handle(ProxyRequest::get("http://game.granbluefantasy.jp/rest/a").unwrap())
                .await
                .unwrap();
            let mut post = ProxyRequest::get("http://game-a.granbluefantasy.jp/a.png").unwrap();
            post.method = Method::POST;
            cache.handle(post).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(origin.calls(), 4);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn error_statuses_are_not_stored() {
        let backend = Arc::new(MemoryCache::new());
        let origin = CountingOrigin::new(StatusCode::NOT_FOUND);
        let cache = handler(backend.clone(), origin.clone());
        let url = "http://game-a.granbluefantasy.jp/missing.png";

        for _ in 0..2 {
            let res = cache.handle(ProxyRequest::get(url).unwrap()).await.unwrap();
            assert_eq!(res.status, StatusCode::NOT_FOUND);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(origin.calls(), 2);
        assert!(backend.is_empty());
    }

    /// Claims every key exists but never has one.
    #[derive(Debug)]
    struct Forgetful;

    #[async_trait]
    impl CacheBackend for Forgetful {
        fn name(&self) -> &'static str {
            "forgetful"
        }
        async fn has(&self, _key: &str) -> std::result::Result<bool, CacheError> {
            Ok(true)
        }
        async fn get(&self, key: &str) -> std::result::Result<Bytes, CacheError> {
            Err(CacheError::NotFound(key.to_string()))
        }
        async fn set(&self, _key: &str, _value: Bytes) -> std::result::Result<(), CacheError> {
            Err(CacheError::NotStarted)
        }
    }

    #[tokio::test]
    async fn vanished_entry_is_a_miss_and_store_failure_is_silent() {
        let origin = CountingOrigin::new(StatusCode::OK);
        let cache = handler(Arc::new(Forgetful), origin.clone());

        let res = cache
            .handle(ProxyRequest::get("http://game-a.granbluefantasy.jp/x.png").unwrap())
            .await
            .unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_leave_a_decodable_entry() {
        let backend = Arc::new(MemoryCache::new());
        let origin = CountingOrigin::new(StatusCode::OK);
        let cache = Arc::new(handler(backend.clone(), origin.clone()));
        let url = "http://game-a1.granbluefantasy.jp/assets/x.png?v=3";

        let (a, b) = tokio::join!(
            cache.handle(ProxyRequest::get(url).unwrap()),
            cache.handle(ProxyRequest::get(url).unwrap())
        );
        for res in [a.unwrap(), b.unwrap()] {
            assert_eq!(res.status, StatusCode::OK);
            assert_eq!(body_of(res).await, "body for /assets/x.png?v=3");
        }

        wait_stored(backend.as_ref(), "/assets/x.png.v=3").await;
        let stored = backend.get("/assets/x.png.v=3").await.unwrap();
        let entry = MsgpackSerializer.decode(&stored).unwrap();
        assert_eq!(entry.status_code, 200);
        assert_eq!(&entry.body[..], b"body for /assets/x.png?v=3");
    }

    #[tokio::test]
    async fn outer_tier_is_filled_from_inner_tier() {
        let inner_backend = Arc::new(MemoryCache::new());
        let outer_backend = Arc::new(MemoryCache::new());
        let origin = CountingOrigin::new(StatusCode::OK);
        let url = "http://game-a.granbluefantasy.jp/a.png";

        let inner = Arc::new(handler(inner_backend.clone(), origin.clone()));
        inner.handle(ProxyRequest::get(url).unwrap()).await.unwrap();
        wait_stored(inner_backend.as_ref(), "/a.png").await;

        let outer = CacheHandler::new(
            outer_backend.clone(),
            Arc::new(MsgpackSerializer),
            Arc::new(AccessControl::new()),
            inner,
        );
        let res = outer.handle(ProxyRequest::get(url).unwrap()).await.unwrap();
        assert_eq!(body_of(res).await, "body for /a.png");
        wait_stored(outer_backend.as_ref(), "/a.png").await;
        assert_eq!(origin.calls(), 1);
    }
}
