//! Round-robin proxy selection strategy

use parking_lot::Mutex;

use super::ProxySelector;
use crate::models::Proxy;

/// Selects proxies in round-robin order over the id-sorted working set
///
/// The counter is process-wide for this selector and guarded by a mutex, so
/// concurrent selections from several worker threads never skip or repeat a
/// slot. It is not persisted.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counter: Mutex<u64>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            counter: Mutex::new(0),
        }
    }

    /// Current counter value
    pub fn position(&self) -> u64 {
        *self.counter.lock()
    }
}

impl ProxySelector for RoundRobinSelector {
    fn pick<'a>(&self, proxies: &'a [Proxy]) -> Option<&'a Proxy> {
        if proxies.is_empty() {
            return None;
        }

        let mut sorted: Vec<&Proxy> = proxies.iter().collect();
        sorted.sort_by_key(|p| p.id);

        let mut counter = self.counter.lock();
        let idx = (*counter % sorted.len() as u64) as usize;
        *counter = counter.wrapping_add(1);

        sorted.get(idx).copied()
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}
