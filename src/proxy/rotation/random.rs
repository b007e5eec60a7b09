//! Random proxy selection strategy

use rand::seq::SliceRandom;

use super::ProxySelector;
use crate::models::Proxy;

/// Selects a uniformly random proxy from the working set
#[derive(Debug, Default)]
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl ProxySelector for RandomSelector {
    fn pick<'a>(&self, proxies: &'a [Proxy]) -> Option<&'a Proxy> {
        let mut rng = rand::thread_rng();
        proxies.choose(&mut rng)
    }

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}
