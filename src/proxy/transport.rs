//! Upstream transport
//!
//! Performs one HTTP exchange through an issued proxy. HTTP, HTTPS and SOCKS5
//! proxies are all driven through reqwest; credentials travel in the proxy URL.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, Method, Response};
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::error::{GatewayError, Result};
use crate::models::ProxyDescriptor;

/// A request ready to be relayed upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Absolute target URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The "perform HTTP request" capability used by the forwarder
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send `request` through `proxy` and buffer the full response
    async fn send(&self, proxy: &ProxyDescriptor, request: &UpstreamRequest)
        -> Result<Response<Bytes>>;
}

/// reqwest-backed upstream client
///
/// One client is kept per proxy URL so that connections to the same proxy
/// are pooled.
pub struct ReqwestUpstream {
    timeout: Duration,
    clients: DashMap<String, Client>,
}

impl ReqwestUpstream {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, proxy_url: &str) -> Result<Client> {
        if let Some(client) = self.clients.get(proxy_url) {
            return Ok(client.clone());
        }

        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            GatewayError::UnexpectedUpstream(format!("unusable proxy URL: {}", e))
        })?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| {
                GatewayError::UnexpectedUpstream(format!("cannot build upstream client: {}", e))
            })?;

        self.clients.insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    #[instrument(skip(self, proxy, request), fields(proxy_id = proxy.proxy_id, method = %request.method))]
    async fn send(
        &self,
        proxy: &ProxyDescriptor,
        request: &UpstreamRequest,
    ) -> Result<Response<Bytes>> {
        let client = self.client_for(&proxy.url)?;

        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        // Derived by the client from the URL and body
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        let upstream = client
            .request(request.method.clone(), &request.url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        let body = upstream.bytes().await?;
        strip_hop_by_hop(&mut response_headers);

        debug!(status = status.as_u16(), bytes = body.len(), "Upstream responded");

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Remove every hop-by-hop header from `headers`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let hop_by_hop: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();

    for name in hop_by_hop {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONNECTION, CONTENT_TYPE, TRANSFER_ENCODING, UPGRADE};
    use http::{HeaderValue, StatusCode};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn descriptor(addr: SocketAddr) -> ProxyDescriptor {
        ProxyDescriptor {
            proxy_id: 1,
            url: format!("http://{}", addr),
            user_id: None,
        }
    }

    /// Plain-HTTP proxy stand-in: captures the request head, replies with `response`
    async fn spawn_capturing_proxy(
        response: &'static str,
    ) -> (SocketAddr, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });

        (addr, rx)
    }

    #[test]
    fn test_is_hop_by_hop_header() {
        for name in [
            "Connection",
            "keep-alive",
            "Proxy-Authenticate",
            "proxy-authorization",
            "TE",
            "trailers",
            "Transfer-Encoding",
            "upgrade",
        ] {
            assert!(is_hop_by_hop_header(name), "{} should be hop-by-hop", name);
        }
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("authorization"));
    }

    #[test]
    fn test_strip_hop_by_hop_keeps_end_to_end_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.insert("x-custom", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[CONTENT_TYPE], "text/html");
        assert_eq!(headers["x-custom"], "1");
    }

    #[tokio::test]
    async fn test_send_relays_through_proxy_and_filters_headers() {
        let (addr, captured) = spawn_capturing_proxy(
            "HTTP/1.1 201 Created\r\ncontent-length: 5\r\nconnection: close\r\nx-upstream: yes\r\n\r\nhello",
        )
        .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-client", HeaderValue::from_static("abc"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic Zm9v"));
        headers.insert(UPGRADE, HeaderValue::from_static("h2c"));

        let request = UpstreamRequest {
            method: Method::GET,
            url: "http://target.test/path?q=1".to_string(),
            headers,
            body: Bytes::new(),
        };

        let upstream = ReqwestUpstream::new(Duration::from_secs(5));
        let response = upstream.send(&descriptor(addr), &request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.body().as_ref(), b"hello");
        assert_eq!(response.headers()["x-upstream"], "yes");
        assert!(response.headers().get(CONNECTION).is_none());

        let head = captured.await.unwrap().to_lowercase();
        assert!(head.starts_with("get http://target.test/path?q=1 http/1.1"));
        assert!(head.contains("x-client: abc"));
        assert!(!head.contains("basic zm9v"));
        assert!(!head.contains("upgrade:"));
    }

    #[tokio::test]
    async fn test_refused_proxy_is_connection_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let request = UpstreamRequest {
            method: Method::GET,
            url: "http://target.test/".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        let upstream = ReqwestUpstream::new(Duration::from_secs(2));
        let err = upstream.send(&descriptor(addr), &request).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProxyConnection(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_proxy_url_is_retryable_upstream_error() {
        let upstream = ReqwestUpstream::new(Duration::from_secs(2));
        let proxy = ProxyDescriptor {
            proxy_id: 9,
            url: "not a proxy url".to_string(),
            user_id: None,
        };
        let request = UpstreamRequest {
            method: Method::GET,
            url: "http://target.test/".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        let err = upstream.send(&proxy, &request).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnexpectedUpstream(_)));
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), http::StatusCode::BAD_GATEWAY);
    }
}
