//! Health-score proxy selection strategy

use chrono::Utc;

use super::ProxySelector;
use crate::models::Proxy;
use crate::proxy::score::score_at;

/// Selects the proxy with the highest health score
///
/// All proxies are scored against the same instant; ties keep input order.
#[derive(Debug, Default)]
pub struct HealthScoreSelector;

impl HealthScoreSelector {
    pub fn new() -> Self {
        Self
    }
}

impl ProxySelector for HealthScoreSelector {
    fn pick<'a>(&self, proxies: &'a [Proxy]) -> Option<&'a Proxy> {
        let now = Utc::now();
        let mut best: Option<(&Proxy, f64)> = None;

        for proxy in proxies {
            let score = score_at(proxy, now);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((proxy, score)),
            }
        }

        best.map(|(proxy, _)| proxy)
    }

    fn strategy_name(&self) -> &'static str {
        "health_score"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::test_support::create_test_proxy;
    use chrono::Duration;

    #[test]
    fn test_health_score_picks_highest() {
        let now = Utc::now();
        let mut slow = create_test_proxy(1);
        slow.latency = Some(800.0);
        slow.last_checked = Some(now);
        let mut fast = create_test_proxy(2);
        fast.latency = Some(40.0);
        fast.last_checked = Some(now);
        let mut flaky = create_test_proxy(3);
        flaky.latency = Some(40.0);
        flaky.fail_count = 4;
        flaky.last_checked = Some(now);

        let proxies = vec![slow, fast, flaky];
        assert_eq!(HealthScoreSelector::new().pick(&proxies).unwrap().id, 2);
    }

    #[test]
    fn test_health_score_ties_keep_input_order() {
        let proxies = vec![create_test_proxy(5), create_test_proxy(2), create_test_proxy(8)];
        assert_eq!(HealthScoreSelector::new().pick(&proxies).unwrap().id, 5);
    }

    #[test]
    fn test_health_score_prefers_recent_check() {
        let now = Utc::now();
        let mut stale = create_test_proxy(1);
        stale.last_checked = Some(now - Duration::days(10));
        let mut recent = create_test_proxy(2);
        recent.last_checked = Some(now - Duration::minutes(2));

        let proxies = vec![stale, recent];
        assert_eq!(HealthScoreSelector::new().pick(&proxies).unwrap().id, 2);
    }
}
