//! Request forwarder with retry and fallback
//!
//! Every inbound request walks the same steps in order: credential check,
//! blacklist check, concurrency slot, primary strategy attempts, at most one
//! fallback attempt, then relay or reject. Whatever happens, the caller gets
//! a response; errors never escape [`Forwarder::forward`].

use std::sync::Arc;

use bytes::Bytes;
use hyper::{Method, Request, Response};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::blacklist::BlacklistCache;
use crate::error::GatewayError;
use crate::models::{ActivityRecord, ProxyDescriptor};
use crate::proxy::issuer::{IssueRequest, ProxyIssuer};
use crate::proxy::middleware::{AuthCheck, ConcurrencyLimiter};
use crate::proxy::rotation::RotationStrategy;
use crate::proxy::transport::{strip_hop_by_hop, UpstreamClient, UpstreamRequest};
use crate::repository::ActivityLogger;

/// Configuration for the forwarder
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub primary_strategy: RotationStrategy,
    pub fallback_strategy: RotationStrategy,
    /// Retries after the first primary attempt
    pub retry_count: u32,
    pub max_concurrent_requests: usize,
    pub require_credential: bool,
    pub default_credential: Option<String>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            primary_strategy: RotationStrategy::Best,
            fallback_strategy: RotationStrategy::HealthScore,
            retry_count: 1,
            max_concurrent_requests: 100,
            require_credential: true,
            default_credential: None,
        }
    }
}

/// Why a single attempt failed
enum AttemptError {
    /// No proxy could be issued; the strategy is abandoned
    Issue(GatewayError),
    /// The upstream exchange through the issued proxy failed
    Upstream(GatewayError, ProxyDescriptor),
}

type Relayed = (Response<Bytes>, ProxyDescriptor);

/// Final error plus the last proxy that was issued, if any
type Exhausted = (GatewayError, Option<ProxyDescriptor>);

/// Forwarding orchestrator
pub struct Forwarder {
    config: ForwarderConfig,
    auth: AuthCheck,
    limiter: ConcurrencyLimiter,
    blacklist: Arc<BlacklistCache>,
    issuer: Arc<dyn ProxyIssuer>,
    upstream: Arc<dyn UpstreamClient>,
    activity: Arc<dyn ActivityLogger>,
}

impl Forwarder {
    pub fn new(
        config: ForwarderConfig,
        blacklist: Arc<BlacklistCache>,
        issuer: Arc<dyn ProxyIssuer>,
        upstream: Arc<dyn UpstreamClient>,
        activity: Arc<dyn ActivityLogger>,
    ) -> Self {
        Self {
            auth: AuthCheck::new(config.require_credential, config.default_credential.clone()),
            limiter: ConcurrencyLimiter::new(config.max_concurrent_requests),
            config,
            blacklist,
            issuer,
            upstream,
            activity,
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Forward one request whose URI is in absolute form
    pub async fn forward(&self, req: Request<Bytes>) -> Response<Bytes> {
        let span = info_span!(
            "forward",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            uri = %req.uri()
        );
        self.forward_inner(req).instrument(span).await
    }

    async fn forward_inner(&self, req: Request<Bytes>) -> Response<Bytes> {
        let method = req.method().clone();
        let target_url = req.uri().to_string();

        let credential = match self.auth.resolve(&req) {
            Ok(credential) => credential,
            Err(e) => return self.reject(e, &method, &target_url, None),
        };

        self.blacklist.ensure_fresh();
        let (blocked, pattern) = self.blacklist.is_blacklisted(&target_url);
        if blocked {
            let pattern = pattern.unwrap_or_default();
            warn!(pattern = %pattern, "Blocked blacklisted URL {}", target_url);
            return self.reject(
                GatewayError::BlacklistMatch { pattern },
                &method,
                &target_url,
                None,
            );
        }

        let (parts, body) = req.into_parts();
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        let request = UpstreamRequest {
            method: method.clone(),
            url: target_url.clone(),
            headers,
            body,
        };

        let outcome = {
            let _permit = match self.limiter.acquire().await {
                Ok(permit) => permit,
                Err(e) => return self.reject(e, &method, &target_url, None),
            };
            self.run_attempts(&request, credential).await
        };

        match outcome {
            Ok((mut response, proxy)) => {
                strip_hop_by_hop(response.headers_mut());
                let status = response.status();
                info!(
                    proxy_id = proxy.proxy_id,
                    status = status.as_u16(),
                    "Relayed {} {}",
                    method,
                    target_url
                );
                self.record_activity(
                    ActivityRecord::for_target(&method, &target_url, status.as_u16())
                        .with_proxy(Some(proxy.proxy_id), proxy.user_id),
                );
                response
            }
            Err((e, last_proxy)) => self.reject(e, &method, &target_url, last_proxy.as_ref()),
        }
    }

    /// Primary strategy attempts, then at most one fallback attempt
    async fn run_attempts(
        &self,
        request: &UpstreamRequest,
        credential: Option<String>,
    ) -> Result<Relayed, Exhausted> {
        let primary = self.config.primary_strategy;
        let max_attempts = self.config.retry_count.saturating_add(1);
        let mut last_error = None;
        let mut last_proxy = None;

        for attempt in 1..=max_attempts {
            match self.attempt(primary, request, &credential).await {
                Ok(relayed) => return Ok(relayed),
                Err(AttemptError::Issue(e)) => {
                    warn!(strategy = %primary, "No proxy issued, abandoning strategy: {}", e);
                    last_error = Some(e);
                    break;
                }
                Err(AttemptError::Upstream(e, proxy)) if e.is_retryable() => {
                    warn!(
                        strategy = %primary,
                        proxy_id = proxy.proxy_id,
                        "Attempt {}/{} failed: {}",
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = Some(e);
                    last_proxy = Some(proxy);
                }
                Err(AttemptError::Upstream(e, proxy)) => {
                    error!(
                        strategy = %primary,
                        proxy_id = proxy.proxy_id,
                        "Attempt failed, not retrying: {}",
                        e
                    );
                    last_error = Some(e);
                    last_proxy = Some(proxy);
                    break;
                }
            }
        }

        let fallback = self.config.fallback_strategy;
        if fallback != primary {
            info!("Falling back to strategy {}", fallback);
            match self.attempt(fallback, request, &credential).await {
                Ok(relayed) => return Ok(relayed),
                Err(AttemptError::Issue(e)) => {
                    warn!(strategy = %fallback, "Fallback attempt failed: {}", e);
                    last_error = Some(e);
                }
                Err(AttemptError::Upstream(e, proxy)) => {
                    warn!(
                        strategy = %fallback,
                        proxy_id = proxy.proxy_id,
                        "Fallback attempt failed: {}",
                        e
                    );
                    last_error = Some(e);
                    last_proxy = Some(proxy);
                }
            }
        }

        let error = last_error.unwrap_or(GatewayError::NoProxyAvailable {
            strategy: primary.to_string(),
        });
        Err((error, last_proxy))
    }

    async fn attempt(
        &self,
        strategy: RotationStrategy,
        request: &UpstreamRequest,
        credential: &Option<String>,
    ) -> Result<Relayed, AttemptError> {
        let issue = IssueRequest {
            strategy,
            target_url: request.url.clone(),
            credential: credential.clone(),
        };
        let proxy = self
            .issuer
            .issue(&issue)
            .await
            .map_err(AttemptError::Issue)?;

        debug!(proxy_id = proxy.proxy_id, strategy = %strategy, "Sending through proxy");
        match self.upstream.send(&proxy, request).await {
            Ok(response) => Ok((response, proxy)),
            Err(e) => Err(AttemptError::Upstream(e, proxy)),
        }
    }

    fn reject(
        &self,
        err: GatewayError,
        method: &Method,
        target_url: &str,
        last_proxy: Option<&ProxyDescriptor>,
    ) -> Response<Bytes> {
        let response = err.to_response();
        if err.is_server_error() {
            error!(status = response.status().as_u16(), "Request failed: {}", err);
        } else {
            info!(status = response.status().as_u16(), "Request rejected: {}", err);
        }

        let mut record = ActivityRecord::for_target(method, target_url, response.status().as_u16());
        if let Some(proxy) = last_proxy {
            record = record.with_proxy(Some(proxy.proxy_id), proxy.user_id);
        }
        self.record_activity(record);
        response
    }

    /// Hand the record to the activity logger without waiting for it
    fn record_activity(&self, record: ActivityRecord) {
        let activity = Arc::clone(&self.activity);
        tokio::spawn(
            async move {
                if let Err(e) = activity.record(record).await {
                    debug!("Failed to record activity: {}", e);
                }
            }
            .in_current_span(),
        );
    }
}
