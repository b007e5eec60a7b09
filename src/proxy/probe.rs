//! Health probing for upstream proxies
//!
//! A probe fetches a fixed reachability target through the proxy and times
//! the round trip. Probing only observes: applying results to the pool is
//! left to the caller (see `services::health_scheduler`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, instrument, warn};

use crate::models::{ProbeError, Proxy, ProxyProbeResult};

/// Prober configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// URL fetched through each proxy
    pub target_url: String,
    /// Timeout for each probe
    pub timeout: Duration,
    /// Maximum number of probes in flight during a batch
    pub max_workers: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_url: "https://httpbin.org/ip".to_string(),
            timeout: Duration::from_secs(10),
            max_workers: 20,
        }
    }
}

/// Performs one probe through one proxy
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(&self, proxy: &Proxy, timeout: Duration) -> ProxyProbeResult;
}

/// Probes by issuing `GET target_url` through the proxy
///
/// Only HTTP 200 counts as success.
pub struct HttpProbeTransport {
    target_url: String,
}

impl HttpProbeTransport {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
        }
    }

    fn client_for(proxy: &Proxy, timeout: Duration) -> reqwest::Result<Client> {
        Client::builder()
            .proxy(reqwest::Proxy::all(proxy.url())?)
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
    }
}

#[async_trait]
impl ProbeTransport for HttpProbeTransport {
    async fn probe(&self, proxy: &Proxy, timeout: Duration) -> ProxyProbeResult {
        let client = match Self::client_for(proxy, timeout) {
            Ok(client) => client,
            Err(e) => {
                return ProxyProbeResult::failure(
                    proxy.id,
                    None,
                    ProbeError::Unexpected(format!("cannot build client: {}", e)),
                )
            }
        };

        let start = Instant::now();
        let outcome = client.get(&self.target_url).send().await;
        let elapsed = elapsed_ms(start);

        match outcome {
            Ok(response) if response.status() == StatusCode::OK => {
                ProxyProbeResult::success(proxy.id, elapsed, response.status().as_u16())
            }
            Ok(response) => ProxyProbeResult::failure(
                proxy.id,
                Some(elapsed),
                ProbeError::HttpStatus(response.status().as_u16()),
            ),
            Err(e) => classify_error(proxy.id, &e, elapsed),
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn classify_error(proxy_id: i64, err: &reqwest::Error, elapsed: f64) -> ProxyProbeResult {
    if err.is_timeout() {
        ProxyProbeResult::failure(proxy_id, Some(elapsed), ProbeError::Timeout)
    } else if err.is_connect() {
        // Refused before any exchange: no meaningful latency
        ProxyProbeResult::failure(proxy_id, None, ProbeError::ProxyConnection(err.to_string()))
    } else {
        ProxyProbeResult::failure(proxy_id, Some(elapsed), ProbeError::Unexpected(err.to_string()))
    }
}

/// Concurrent proxy prober
#[derive(Clone)]
pub struct ProxyProber {
    transport: Arc<dyn ProbeTransport>,
    config: ProbeConfig,
}

impl ProxyProber {
    pub fn new(transport: Arc<dyn ProbeTransport>, config: ProbeConfig) -> Self {
        Self { transport, config }
    }

    /// Prober fetching `config.target_url` over HTTP
    pub fn http(config: ProbeConfig) -> Self {
        let transport = Arc::new(HttpProbeTransport::new(config.target_url.clone()));
        Self::new(transport, config)
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe a single proxy
    #[instrument(skip(self, proxy), fields(proxy_id = proxy.id, proxy_address = %proxy.address()))]
    pub async fn probe_one(&self, proxy: &Proxy, timeout: Duration) -> ProxyProbeResult {
        let result = self.transport.probe(proxy, timeout).await;
        match &result.error {
            None if result.success => debug!(latency_ms = ?result.latency, "Proxy is healthy"),
            Some(e) => warn!("Proxy {} is unhealthy: {}", proxy.address(), e),
            None => warn!("Proxy {} probe produced no classification", proxy.address()),
        }
        result
    }

    /// Probe many proxies with at most `max_workers` in flight
    ///
    /// Every input proxy has an entry in the result. A probe task that dies
    /// (panics or is cancelled) yields [`ProxyProbeResult::unclassified`]
    /// without affecting its siblings.
    #[instrument(skip(self, proxies), fields(count = proxies.len()))]
    pub async fn probe_batch(
        &self,
        proxies: Vec<Proxy>,
        timeout: Duration,
    ) -> HashMap<i64, ProxyProbeResult> {
        let workers = self.config.max_workers.max(1);

        let outcomes = futures::stream::iter(proxies)
            .map(|proxy| {
                let prober = self.clone();
                async move {
                    let proxy_id = proxy.id;
                    let task =
                        tokio::spawn(async move { prober.probe_one(&proxy, timeout).await });
                    (proxy_id, task.await)
                }
            })
            .buffer_unordered(workers)
            .collect::<Vec<_>>()
            .await;

        let mut results = HashMap::with_capacity(outcomes.len());
        for (proxy_id, outcome) in outcomes {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    error!(proxy_id, "Probe execution failed: {}", e);
                    ProxyProbeResult::unclassified(proxy_id)
                }
            };
            results.insert(proxy_id, result);
        }

        let working = results.values().filter(|r| r.success).count();
        debug!(
            "Probe batch complete: {} working, {} failed",
            working,
            results.len() - working
        );

        results
    }
}
