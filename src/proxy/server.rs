//! Forward server implementation using hyper
//!
//! Accepts plain HTTP proxy requests, normalizes the target to an absolute
//! URL and hands them to the [`Forwarder`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{GatewayError, Result};
use crate::proxy::handler::Forwarder;

/// HTTP/1 listener in front of the forwarder
pub struct ForwardServer {
    host: String,
    port: u16,
    forwarder: Arc<Forwarder>,
}

impl ForwardServer {
    pub fn new(host: impl Into<String>, port: u16, forwarder: Arc<Forwarder>) -> Self {
        Self {
            host: host.into(),
            port,
            forwarder,
        }
    }

    fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                GatewayError::InvalidConfig(format!(
                    "invalid listen address {}:{}: {}",
                    self.host, self.port, e
                ))
            })
    }

    /// Bind the configured address and serve until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(self.addr()?).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Forward server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let forwarder = self.forwarder.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, forwarder).await {
                                    debug!("Connection from {} ended: {}", client_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Forward server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    async fn handle_connection(stream: TcpStream, forwarder: Arc<Forwarder>) -> Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let forwarder = forwarder.clone();
            async move { Ok::<_, Infallible>(Self::handle(req, &forwarder).await) }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(io, service)
            .await?;

        Ok(())
    }

    async fn handle(req: Request<Incoming>, forwarder: &Forwarder) -> Response<Full<Bytes>> {
        if req.method() == Method::CONNECT {
            warn!("Refusing CONNECT to {}", req.uri());
            return text_response(
                StatusCode::NOT_IMPLEMENTED,
                "Not Implemented: CONNECT tunneling is not supported",
            );
        }

        let (mut parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!("Failed to read request body: {}", e);
                return text_response(StatusCode::BAD_REQUEST, "Bad Request: unreadable body");
            }
        };

        match absolute_target(&parts.uri, parts.headers.get(HOST).and_then(|h| h.to_str().ok())) {
            Ok(uri) => parts.uri = uri,
            Err(e) => return e.to_response().map(Full::new),
        }

        forwarder
            .forward(Request::from_parts(parts, body))
            .await
            .map(Full::new)
    }
}

/// Absolute-form target for a request line
///
/// Absolute-form URIs are kept; origin-form ones are rebuilt from `Host`.
pub fn absolute_target(uri: &Uri, host: Option<&str>) -> Result<Uri> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.clone());
    }

    let host = host
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("missing Host header".to_string()))?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    format!("http://{}{}", host, path)
        .parse()
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid target: {}", e)))
}

fn text_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain"));
    response
}
