//! Proxy rotation strategies
//!
//! This module provides the strategies for picking one proxy out of the
//! working set, and the [`RotationSelector`] that dispatches between them.

mod best;
mod health_score;
mod lru;
mod random;
mod round_robin;

pub use best::BestLatencySelector;
pub use health_score::HealthScoreSelector;
pub use lru::LruSelector;
pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{GatewayError, Result};
use crate::models::Proxy;
use crate::repository::ProxyStore;

/// Strategy types for proxy rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    Random,
    RoundRobin,
    Lru,
    Best,
    #[default]
    HealthScore,
}

impl RotationStrategy {
    pub const ALL: [RotationStrategy; 5] = [
        RotationStrategy::Random,
        RotationStrategy::RoundRobin,
        RotationStrategy::Lru,
        RotationStrategy::Best,
        RotationStrategy::HealthScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RoundRobin => "round_robin",
            Self::Lru => "lru",
            Self::Best => "best",
            Self::HealthScore => "health_score",
        }
    }

    /// Resolve a strategy name, degrading unknown names to `health_score`
    pub fn resolve(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown strategy: {}, using health_score", name);
            Self::HealthScore
        })
    }
}

impl FromStr for RotationStrategy {
    type Err = GatewayError;

    /// Exact, case-sensitive match on the five public names
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown strategy: {}", s)))
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for proxy selection strategies
///
/// Implementations pick one proxy from a non-empty working set. They never
/// mutate the proxies; "mark used" is applied by [`RotationSelector`].
pub trait ProxySelector: Send + Sync {
    /// Select a proxy from the given working set
    fn pick<'a>(&self, proxies: &'a [Proxy]) -> Option<&'a Proxy>;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Dispatches selection requests to the strategy they name
///
/// Constructed once and shared; the round-robin counter lives here and is
/// therefore common to every round-robin selection.
pub struct RotationSelector {
    store: Arc<dyn ProxyStore>,
    random: RandomSelector,
    round_robin: RoundRobinSelector,
    lru: LruSelector,
    best: BestLatencySelector,
    health_score: HealthScoreSelector,
}

impl RotationSelector {
    pub fn new(store: Arc<dyn ProxyStore>) -> Self {
        Self {
            store,
            random: RandomSelector::new(),
            round_robin: RoundRobinSelector::new(),
            lru: LruSelector::new(),
            best: BestLatencySelector::new(),
            health_score: HealthScoreSelector::new(),
        }
    }

    fn selector(&self, strategy: RotationStrategy) -> &dyn ProxySelector {
        match strategy {
            RotationStrategy::Random => &self.random,
            RotationStrategy::RoundRobin => &self.round_robin,
            RotationStrategy::Lru => &self.lru,
            RotationStrategy::Best => &self.best,
            RotationStrategy::HealthScore => &self.health_score,
        }
    }

    /// Pick a proxy from `working` and mark it used
    ///
    /// The returned copy already carries the new `last_used`.
    #[instrument(skip(self, working), fields(strategy = %strategy, pool = working.len()))]
    pub async fn select(&self, strategy: RotationStrategy, working: &[Proxy]) -> Result<Proxy> {
        let no_proxy = || GatewayError::NoProxyAvailable {
            strategy: strategy.to_string(),
        };

        let mut chosen = self
            .selector(strategy)
            .pick(working)
            .cloned()
            .ok_or_else(no_proxy)?;

        if let Err(e) = self.store.mark_used(chosen.id).await {
            warn!(proxy_id = chosen.id, error = %e, "Failed to mark proxy as used");
        }
        chosen.last_used = Some(Utc::now());

        debug!(proxy_id = chosen.id, "Selected proxy {}", chosen.address());
        Ok(chosen)
    }

    /// Same as [`select`](Self::select) with a free-form strategy name
    pub async fn select_by_name(&self, strategy: &str, working: &[Proxy]) -> Result<Proxy> {
        self.select(RotationStrategy::resolve(strategy), working).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::{Proxy, ProxyProtocol};

    pub fn create_test_proxy(id: i64) -> Proxy {
        let mut proxy = Proxy::new(id, "127.0.0.1", 8000 + id as u16, ProxyProtocol::Http);
        proxy.is_working = true;
        proxy
    }
}
