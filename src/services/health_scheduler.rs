//! Periodic proxy health checks
//!
//! Probes the whole pool on an interval and folds every result back into the
//! proxy store, so that failed proxies can recover and working ones can drop
//! out of rotation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::proxy::probe::ProxyProber;
use crate::repository::ProxyStore;

/// Health scheduler configuration
#[derive(Debug, Clone)]
pub struct HealthSchedulerConfig {
    /// Time between probe rounds
    pub check_interval: Duration,
}

impl Default for HealthSchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
        }
    }
}

/// Totals for one probe round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub working: usize,
    pub failed: usize,
}

/// Health scheduler
pub struct HealthScheduler {
    store: Arc<dyn ProxyStore>,
    prober: ProxyProber,
    config: HealthSchedulerConfig,
}

impl HealthScheduler {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        prober: ProxyProber,
        config: HealthSchedulerConfig,
    ) -> Self {
        Self {
            store,
            prober,
            config,
        }
    }

    /// Run rounds until shutdown; the first round starts immediately
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.config.check_interval.is_zero() {
            error!("Health scheduler not started: check interval is zero");
            return;
        }

        info!(
            "Starting health scheduler with {}s interval",
            self.config.check_interval.as_secs()
        );

        let mut ticker = interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_round().await {
                        error!("Health check round failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Probe every proxy once and apply the results
    #[instrument(skip(self))]
    pub async fn run_round(&self) -> Result<RoundSummary> {
        // Include failed proxies so they can recover
        let proxies = self.store.list_proxies().await?;
        if proxies.is_empty() {
            info!("No proxies to check");
            return Ok(RoundSummary::default());
        }

        info!("Checking health of {} proxies", proxies.len());
        let timeout = self.prober.config().timeout;
        let results = self.prober.probe_batch(proxies, timeout).await;

        let mut summary = RoundSummary::default();
        for (proxy_id, result) in &results {
            if let Err(e) = self.store.apply_probe_result(*proxy_id, result).await {
                warn!(proxy_id, "Failed to record probe result: {}", e);
                continue;
            }
            if result.success {
                summary.working += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(
            working = summary.working,
            failed = summary.failed,
            "Health check round complete"
        );
        Ok(summary)
    }
}

/// Handle for stopping the health scheduler
pub struct HealthSchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthSchedulerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthSchedulerHandle {
    fn default() -> Self {
        Self::new().0
    }
}
