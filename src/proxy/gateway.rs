//! Per-connection controller.
//!
//! # Responsibilities
//! - Answer CONNECT handshakes, including ones sent on a kept-alive connection
//! - Refuse hosts outside the allow-list before anything is dialed
//! - Decide between a raw tunnel and interception through the handler chain
//! - Keep intercepting on the same connection while the client asks for keep-alive
//!
//! # State Machine
//! ```text
//! AwaitingRequest ──CONNECT──→ denied? → 403, done
//!        │                        │
//!        │                     200 Connection Established
//!        │                        │ plaintext target → read inner request, merge
//!        ▼                        ▼
//!   allowed && (secure || !asset) → Tunnel (replay head if plaintext) → pipe
//!   otherwise                     → Intercept → router → write response
//!                                        └─ keep-alive → AwaitingRequest
//! ```
//!
//! # Design Decisions
//! - Only this module writes to the client; a handler error becomes a 502 here
//! - Once a tunnel is running there is no response channel left; errors are returned for logging

use std::sync::Arc;

use http::Method;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, info_span, warn, Instrument};

use crate::error::{ProxyError, Result};
use crate::handlers::RequestHandler;
use crate::http::response::{bad_gateway, connection_established, forbidden};
use crate::http::{merge, normalize, ProxyRequest, RequestReader};
use crate::net::{Connector, Pipe};
use crate::observability::metrics::{self, Decision};
use crate::security::AccessControl;

/// Whether the connection has gone through a CONNECT handshake.
#[derive(Debug, Clone)]
enum Handshake {
    /// Requests arrive in proxy form directly on the connection.
    Direct,
    /// A CONNECT was answered; later requests are relative to its target.
    Established(ProxyRequest),
}

pub struct Gateway {
    access: Arc<AccessControl>,
    router: Arc<dyn RequestHandler>,
    connector: Arc<dyn Connector>,
    pipe: Pipe,
    max_header_bytes: usize,
    max_body_bytes: usize,
}

impl Gateway {
    pub fn new(
        access: Arc<AccessControl>,
        router: Arc<dyn RequestHandler>,
        connector: Arc<dyn Connector>,
        pipe: Pipe,
        max_header_bytes: usize,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            access,
            router,
            connector,
            pipe,
            max_header_bytes,
            max_body_bytes,
        }
    }

    /// Serve one client connection until it is done.
    pub async fn forward<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = RequestReader::new(reader, self.max_header_bytes, self.max_body_bytes);
        let mut handshake = Handshake::Direct;
        let mut next = reader.read_request().await?;

        loop {
            let req = match self
                .resolve(next, &mut handshake, &mut reader, &mut writer)
                .await?
            {
                Some(req) => req,
                None => return Ok(()),
            };

            let span = info_span!("request", method = %req.method, url = %req.url);
            if self.should_tunnel(&req) {
                return self
                    .tunnel(req, &handshake, &mut reader, &mut writer)
                    .instrument(span)
                    .await;
            }
            let keep_alive = self
                .intercept(req, &mut reader, &mut writer)
                .instrument(span)
                .await?;
            if !keep_alive {
                return Ok(());
            }

            next = match reader.read_request().await {
                Ok(next) => next,
                Err(e) if e.is_eof() => return Ok(()),
                Err(e) => return Err(e),
            };
        }
    }

    /// Turn a request read off the wire into the one to serve.
    ///
    /// A CONNECT is answered here and becomes the base that later requests on
    /// the connection are merged onto. For a plaintext target the request
    /// inside the tunnel is read and returned instead. `None` means the
    /// CONNECT was refused and the connection is done.
    async fn resolve<R, W>(
        &self,
        mut raw: ProxyRequest,
        handshake: &mut Handshake,
        reader: &mut RequestReader<R>,
        writer: &mut W,
    ) -> Result<Option<ProxyRequest>>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            if raw.method != Method::CONNECT {
                let req = match handshake {
                    Handshake::Direct => normalize(raw),
                    Handshake::Established(connect) => normalize(merge(connect.clone(), raw)),
                };
                return Ok(Some(req));
            }

            let connect = normalize(raw);
            let host = connect.url.hostname().to_string();
            if !self.access.is_allowed(&host) {
                info!(host = %host, "Denying tunnel");
                metrics::record_decision(Decision::Deny);
                let message = format!("Connection tunnelling to host {} is not allowed", host);
                forbidden(message).write_to(writer, &connect, false).await?;
                return Ok(None);
            }
            connection_established()
                .write_to(writer, &connect, true)
                .await?;
            *handshake = Handshake::Established(connect.clone());
            if !connect.url.is_plaintext() {
                return Ok(Some(connect));
            }
            raw = reader.read_request().await?;
        }
    }

    fn should_tunnel(&self, req: &ProxyRequest) -> bool {
        let host = req.url.hostname();
        self.access.is_allowed(host) && (!req.url.is_plaintext() || !self.access.is_asset(host))
    }

    async fn tunnel<R, W>(
        &self,
        req: ProxyRequest,
        handshake: &Handshake,
        reader: &mut RequestReader<R>,
        writer: &mut W,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        info!("Tunneling request");
        metrics::record_decision(Decision::Tunnel);

        let (host, port) = req.url.dial_address();
        let mut origin = match self.connector.connect(&host, port).await {
            Ok(stream) => stream,
            Err(source) => {
                let err = ProxyError::Connect {
                    addr: format!("{}:{}", host, port),
                    source,
                };
                if matches!(handshake, Handshake::Direct) {
                    metrics::record_upstream_error();
                    bad_gateway().write_to(writer, &req, false).await?;
                }
                return Err(err);
            }
        };

        if req.url.is_plaintext() {
            req.write_head(&mut origin).await?;
        }
        let (mut origin_reader, mut origin_writer) = origin.split();
        self.pipe
            .run(reader, writer, &mut origin_reader, &mut origin_writer)
            .await?;
        Ok(())
    }

    /// Answer one request through the handler chain. Returns whether to read another.
    async fn intercept<R, W>(
        &self,
        mut req: ProxyRequest,
        reader: &mut RequestReader<R>,
        writer: &mut W,
    ) -> Result<bool>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        info!("Intercepting request");
        metrics::record_decision(Decision::Intercept);

        req.body = reader.read_body(&req.headers).await?;
        let keep_alive = req.wants_keep_alive();
        let head = ProxyRequest {
            body: Default::default(),
            ..req.clone()
        };

        let outcome = match self.router.handle(req).await {
            Ok(mut response) => response.spool().await.map(|_| response),
            Err(e) => Err(e),
        };
        let mut response = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Intercepted request failed");
                metrics::record_upstream_error();
                bad_gateway().write_to(writer, &head, false).await?;
                return Err(e);
            }
        };

        response.write_to(writer, &head, keep_alive).await?;
        Ok(keep_alive)
    }
}
