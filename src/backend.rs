//! Management backend client
//!
//! When the proxy pool, users and blacklist are administered by a separate
//! management API, the forwarder reaches all three collaborators over HTTP:
//! proxy issuance, blacklist rules and activity logging.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::blacklist::BlacklistSource;
use crate::error::{GatewayError, Result};
use crate::models::{ActivityRecord, BlacklistRule, Proxy, ProxyDescriptor, ProxyProtocol};
use crate::proxy::issuer::{IssueRequest, ProxyIssuer};
use crate::repository::ActivityLogger;

/// Where the management API lives and how to authenticate against it
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub proxy_endpoint: String,
    pub blacklist_endpoint: String,
    pub activity_endpoint: String,
    /// Service token for blacklist and activity calls
    pub system_token: String,
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            proxy_endpoint: "/proxy".to_string(),
            blacklist_endpoint: "/blacklist".to_string(),
            activity_endpoint: "/activity".to_string(),
            system_token: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Proxy as returned by the issuance endpoint
#[derive(Debug, Deserialize)]
struct IssuedProxy {
    id: i64,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    user_id: Option<i64>,
}

impl IssuedProxy {
    fn host_port(&self) -> Result<(String, u16)> {
        if let Some(address) = self.address.as_deref().filter(|a| !a.is_empty()) {
            let (host, port) = address.rsplit_once(':').ok_or_else(|| {
                GatewayError::InvalidProxyAddress(format!("missing port in {}", address))
            })?;
            let port = port
                .parse()
                .map_err(|_| GatewayError::InvalidProxyAddress(address.to_string()))?;
            return Ok((host.to_string(), port));
        }

        match (&self.ip, self.port) {
            (Some(ip), Some(port)) => Ok((ip.clone(), port)),
            _ => Err(GatewayError::InvalidProxyAddress(format!(
                "proxy {} has no address",
                self.id
            ))),
        }
    }

    fn into_descriptor(self) -> Result<ProxyDescriptor> {
        let (host, port) = self.host_port()?;
        let protocol: ProxyProtocol = self.protocol.as_deref().unwrap_or("http").parse()?;

        let mut proxy = Proxy::new(self.id, host, port, protocol);
        if let (Some(username), Some(password)) = (self.username, self.password) {
            proxy.username = Some(username);
            proxy.password = Some(password);
        }

        Ok(ProxyDescriptor::from_proxy(&proxy, self.user_id))
    }
}

/// Activity payload; the timestamp is fractional Unix seconds
#[derive(Debug, Serialize)]
struct ActivityPayload<'a> {
    user_id: Option<i64>,
    endpoint: &'a str,
    method: &'a str,
    status_code: u16,
    target_url: &'a str,
    proxy_id: Option<i64>,
    timestamp: f64,
}

impl<'a> From<&'a ActivityRecord> for ActivityPayload<'a> {
    fn from(record: &'a ActivityRecord) -> Self {
        Self {
            user_id: record.user_id,
            endpoint: &record.endpoint,
            method: &record.method,
            status_code: record.status_code,
            target_url: record.target_url.as_deref().unwrap_or(&record.endpoint),
            proxy_id: record.proxy_id,
            timestamp: record.timestamp.timestamp_millis() as f64 / 1000.0,
        }
    }
}

/// HTTP client for the management API
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("cannot build backend client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn system_auth(&self) -> String {
        format!("Bearer {}", self.config.system_token)
    }
}

#[async_trait]
impl ProxyIssuer for BackendClient {
    #[instrument(skip(self, request), fields(strategy = %request.strategy))]
    async fn issue(&self, request: &IssueRequest) -> Result<ProxyDescriptor> {
        let none_available = || GatewayError::NoProxyAvailable {
            strategy: request.strategy.to_string(),
        };

        let mut call = self
            .client
            .get(self.url(&self.config.proxy_endpoint))
            .query(&[
                ("strategy", request.strategy.as_str()),
                ("target_url", request.target_url.as_str()),
            ]);
        if let Some(credential) = &request.credential {
            call = call.header(AUTHORIZATION, credential);
        }

        let response = match call.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Proxy endpoint unreachable: {}", e);
                return Err(none_available());
            }
        };

        match response.status() {
            StatusCode::OK => {
                let issued = match response.json::<IssuedProxy>().await {
                    Ok(issued) => issued,
                    Err(e) => {
                        error!("Invalid proxy response: {}", e);
                        return Err(none_available());
                    }
                };
                match issued.into_descriptor() {
                    Ok(descriptor) => {
                        debug!(proxy_id = descriptor.proxy_id, "Backend issued proxy");
                        Ok(descriptor)
                    }
                    Err(e) => {
                        error!("Backend issued an unusable proxy: {}", e);
                        Err(none_available())
                    }
                }
            }
            StatusCode::FORBIDDEN => {
                warn!("Backend refused target {}", request.target_url);
                Err(none_available())
            }
            StatusCode::NOT_FOUND => {
                warn!("Backend has no working proxies");
                Err(none_available())
            }
            status => {
                error!("Unexpected status from proxy endpoint: {}", status);
                Err(none_available())
            }
        }
    }
}

#[async_trait]
impl BlacklistSource for BackendClient {
    async fn fetch_rules(&self) -> Result<Vec<BlacklistRule>> {
        let response = self
            .client
            .get(self.url(&self.config.blacklist_endpoint))
            .header(AUTHORIZATION, self.system_auth())
            .send()
            .await
            .map_err(|e| GatewayError::Backend(format!("blacklist fetch failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(GatewayError::Backend(format!(
                "unexpected status from blacklist endpoint: {}",
                response.status()
            )));
        }

        let entries: Vec<Value> = response
            .json()
            .await
            .map_err(|e| GatewayError::Backend(format!("invalid blacklist response: {}", e)))?;

        // A malformed entry only drops itself
        let rules = entries
            .into_iter()
            .filter_map(|entry| match BlacklistRule::deserialize(&entry) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("Skipping malformed blacklist rule {}: {}", entry, e);
                    None
                }
            })
            .collect();
        Ok(rules)
    }
}

#[async_trait]
impl ActivityLogger for BackendClient {
    async fn record(&self, record: ActivityRecord) -> Result<()> {
        let response = self
            .client
            .post(self.url(&self.config.activity_endpoint))
            .header(AUTHORIZATION, self.system_auth())
            .json(&ActivityPayload::from(&record))
            .send()
            .await
            .map_err(|e| GatewayError::ActivityLog(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::ActivityLog(format!(
                "activity endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
