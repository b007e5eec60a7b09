//! Least-recently-used proxy selection strategy

use super::ProxySelector;
use crate::models::Proxy;

/// Selects the proxy with the oldest `last_used`
///
/// Never-used proxies sort before any timestamp; ties keep input order.
#[derive(Debug, Default)]
pub struct LruSelector;

impl LruSelector {
    pub fn new() -> Self {
        Self
    }
}

impl ProxySelector for LruSelector {
    fn pick<'a>(&self, proxies: &'a [Proxy]) -> Option<&'a Proxy> {
        // `None < Some(_)`, and `min_by_key` keeps the first of equal minima
        proxies.iter().min_by_key(|p| p.last_used)
    }

    fn strategy_name(&self) -> &'static str {
        "lru"
    }
}
