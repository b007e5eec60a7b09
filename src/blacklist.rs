//! Destination blacklist
//!
//! Rules come from a [`BlacklistSource`] and are compiled into an immutable
//! [`BlacklistSnapshot`] that is swapped in atomically. Request handlers only
//! ever read the current snapshot; refreshing happens on a background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::models::BlacklistRule;

/// Where blacklist rules are fetched from
#[async_trait]
pub trait BlacklistSource: Send + Sync {
    async fn fetch_rules(&self) -> Result<Vec<BlacklistRule>>;
}

/// Fixed rule set, used when no management backend is configured
#[derive(Debug, Clone, Default)]
pub struct StaticBlacklistSource {
    rules: Vec<BlacklistRule>,
}

impl StaticBlacklistSource {
    pub fn new(rules: Vec<BlacklistRule>) -> Self {
        Self { rules }
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(patterns.into_iter().map(BlacklistRule::new).collect())
    }
}

#[async_trait]
impl BlacklistSource for StaticBlacklistSource {
    async fn fetch_rules(&self) -> Result<Vec<BlacklistRule>> {
        Ok(self.rules.clone())
    }
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    rule: BlacklistRule,
}

fn compile(rule: &BlacklistRule) -> Result<Regex> {
    RegexBuilder::new(&rule.pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| GatewayError::InvalidBlacklistPattern {
            pattern: rule.pattern.clone(),
            reason: e.to_string(),
        })
}

/// Compiled rules plus the instant of the refresh that produced them
#[derive(Debug, Default)]
pub struct BlacklistSnapshot {
    rules: Vec<CompiledRule>,
    refreshed_at: Option<Instant>,
}

impl BlacklistSnapshot {
    /// Compile `rules` in order, dropping blank patterns and invalid regexes
    pub fn compile(rules: Vec<BlacklistRule>, refreshed_at: Instant) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| {
                let blank = rule.pattern.trim().is_empty();
                if blank {
                    warn!(rule_id = ?rule.id, "Skipping blacklist rule with empty pattern");
                }
                !blank
            })
            .filter_map(|rule| match compile(&rule) {
                Ok(regex) => Some(CompiledRule { regex, rule }),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            })
            .collect();

        Self {
            rules,
            refreshed_at: Some(refreshed_at),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }

    /// First rule, in snapshot order, whose pattern matches `url`
    pub fn find_match(&self, url: &str) -> Option<&BlacklistRule> {
        self.rules
            .iter()
            .find(|compiled| compiled.regex.is_match(url))
            .map(|compiled| &compiled.rule)
    }
}

/// TTL-cached blacklist matcher
pub struct BlacklistCache {
    source: Arc<dyn BlacklistSource>,
    ttl: Duration,
    snapshot: ArcSwap<BlacklistSnapshot>,
    refreshing: AtomicBool,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl BlacklistCache {
    /// Create an empty cache; it reports itself stale until the first refresh
    pub fn new(source: Arc<dyn BlacklistSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: ArcSwap::from_pointee(BlacklistSnapshot::default()),
            refreshing: AtomicBool::new(false),
            refresh_task: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<BlacklistSnapshot> {
        self.snapshot.load_full()
    }

    /// Fetch and compile the rule set, then swap it in
    ///
    /// On a fetch error the current snapshot is kept and the error is
    /// returned for the caller to log or ignore. Returns the number of
    /// compiled patterns on success.
    pub async fn refresh(&self) -> Result<usize> {
        let rules = match self.source.fetch_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Blacklist refresh failed, keeping previous rules: {}", e);
                return Err(e);
            }
        };

        let fetched = rules.len();
        let snapshot = BlacklistSnapshot::compile(rules, Instant::now());
        let compiled = snapshot.len();
        self.snapshot.store(Arc::new(snapshot));

        info!(
            "Blacklist refreshed: {} patterns compiled ({} fetched)",
            compiled, fetched
        );
        Ok(compiled)
    }

    /// Test `url` against the blacklist, returning the matched pattern
    pub fn is_blacklisted(&self, url: &str) -> (bool, Option<String>) {
        if url.is_empty() {
            return (false, None);
        }

        let snapshot = self.snapshot.load();
        match snapshot.find_match(url) {
            Some(rule) => {
                debug!(url, pattern = %rule.pattern, "URL matched blacklist");
                (true, Some(rule.pattern.clone()))
            }
            None => (false, None),
        }
    }

    /// Whether the last successful refresh is older than the TTL
    pub fn needs_refresh(&self) -> bool {
        match self.snapshot.load().refreshed_at {
            Some(at) => at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Start a background refresh if the cache is stale
    ///
    /// Never waits for the refresh. At most one such refresh runs at a time.
    pub fn ensure_fresh(self: &Arc<Self>) {
        if !self.needs_refresh() {
            return;
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = RefreshingGuard(&cache.refreshing);
            let _ = cache.refresh().await;
        });
    }

    /// Refresh now and then every TTL until stopped
    ///
    /// Calling this again replaces the running task.
    pub fn start_auto_refresh(self: &Arc<Self>) {
        let ttl = self.ttl;
        if ttl.is_zero() {
            error!("Blacklist auto-refresh not started: refresh interval is zero");
            return;
        }
        let cache: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let _ = cache.refresh().await;
            }
        });

        if let Some(previous) = self.refresh_task.lock().replace(handle) {
            previous.abort();
        }
        info!("Blacklist auto-refresh started (every {:?})", ttl);
    }

    /// Stop the background task, abandoning any refresh in flight
    pub fn stop_auto_refresh(&self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
            info!("Blacklist auto-refresh stopped");
        }
    }
}

/// Clears the in-flight flag even if the refresh task panics
struct RefreshingGuard<'a>(&'a AtomicBool);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Drop for BlacklistCache {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_task.get_mut().take() {
            handle.abort();
        }
    }
}
