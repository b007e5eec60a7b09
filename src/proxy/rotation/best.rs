//! Lowest-latency proxy selection strategy

use super::ProxySelector;
use crate::models::Proxy;

/// Selects the proxy with the lowest measured latency
///
/// Proxies without latency data are skipped. When none has latency data the
/// first proxy of the working set is returned as-is, which is not a
/// latency-based choice at all.
// TODO: confirm with product owners whether the no-latency case should fall back to health_score instead
#[derive(Debug, Default)]
pub struct BestLatencySelector;

impl BestLatencySelector {
    pub fn new() -> Self {
        Self
    }
}

impl ProxySelector for BestLatencySelector {
    fn pick<'a>(&self, proxies: &'a [Proxy]) -> Option<&'a Proxy> {
        proxies
            .iter()
            .filter_map(|p| p.latency.map(|latency| (p, latency)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(p, _)| p)
            .or_else(|| proxies.first())
    }

    fn strategy_name(&self) -> &'static str {
        "best"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::test_support::create_test_proxy;

    fn with_latency(id: i64, latency: Option<f64>) -> Proxy {
        let mut proxy = create_test_proxy(id);
        proxy.latency = latency;
        proxy
    }

    #[test]
    fn test_best_picks_lowest_latency() {
        let proxies = vec![
            with_latency(1, Some(300.0)),
            with_latency(2, Some(45.5)),
            with_latency(3, Some(120.0)),
        ];
        assert_eq!(BestLatencySelector::new().pick(&proxies).unwrap().id, 2);
    }

    #[test]
    fn test_best_ignores_proxies_without_latency() {
        let proxies = vec![with_latency(1, None), with_latency(2, Some(900.0))];
        assert_eq!(BestLatencySelector::new().pick(&proxies).unwrap().id, 2);
    }

    #[test]
    fn test_best_without_any_latency_returns_first() {
        let proxies = vec![with_latency(9, None), with_latency(1, None)];
        assert_eq!(BestLatencySelector::new().pick(&proxies).unwrap().id, 9);
    }

    #[test]
    fn test_best_empty() {
        assert!(BestLatencySelector::new().pick(&[]).is_none());
    }
}
