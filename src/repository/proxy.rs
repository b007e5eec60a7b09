use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::models::{Proxy, ProxyProbeResult};

/// Record store for the proxy pool
///
/// The gateway never creates or deletes proxies; it only reads the pool and
/// mutates usage and health fields.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// All proxies currently marked `is_working`
    async fn get_working_proxies(&self) -> Result<Vec<Proxy>>;

    /// Every proxy, working or not
    async fn list_proxies(&self) -> Result<Vec<Proxy>>;

    /// Set `last_used` to now (idempotent)
    async fn mark_used(&self, proxy_id: i64) -> Result<()>;

    /// Fold a probe outcome into the stored proxy
    async fn apply_probe_result(&self, proxy_id: i64, result: &ProxyProbeResult) -> Result<()>;
}

/// In-process proxy store
///
/// Listings are returned in ascending id order so that strategies relying on
/// input order behave deterministically.
#[derive(Debug, Default)]
pub struct MemoryProxyStore {
    proxies: DashMap<i64, Proxy>,
}

impl MemoryProxyStore {
    pub fn new() -> Self {
        Self {
            proxies: DashMap::new(),
        }
    }

    pub fn with_proxies(proxies: impl IntoIterator<Item = Proxy>) -> Self {
        let store = Self::new();
        for proxy in proxies {
            store.insert(proxy);
        }
        store
    }

    /// Insert or replace a proxy
    pub fn insert(&self, proxy: Proxy) {
        self.proxies.insert(proxy.id, proxy);
    }

    pub fn get(&self, proxy_id: i64) -> Option<Proxy> {
        self.proxies.get(&proxy_id).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn sorted(&self, filter: impl Fn(&Proxy) -> bool) -> Vec<Proxy> {
        let mut proxies: Vec<Proxy> = self
            .proxies
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        proxies.sort_by_key(|p| p.id);
        proxies
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn get_working_proxies(&self) -> Result<Vec<Proxy>> {
        Ok(self.sorted(|p| p.is_working))
    }

    async fn list_proxies(&self) -> Result<Vec<Proxy>> {
        Ok(self.sorted(|_| true))
    }

    async fn mark_used(&self, proxy_id: i64) -> Result<()> {
        let mut proxy = self
            .proxies
            .get_mut(&proxy_id)
            .ok_or(GatewayError::ProxyNotFound { id: proxy_id })?;
        proxy.last_used = Some(Utc::now());
        Ok(())
    }

    async fn apply_probe_result(&self, proxy_id: i64, result: &ProxyProbeResult) -> Result<()> {
        let mut proxy = self
            .proxies
            .get_mut(&proxy_id)
            .ok_or(GatewayError::ProxyNotFound { id: proxy_id })?;
        proxy.apply_probe_result(result, Utc::now());
        debug!(
            proxy_id,
            is_working = proxy.is_working,
            fail_count = proxy.fail_count,
            "Applied probe result"
        );
        Ok(())
    }
}
