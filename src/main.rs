//! Rotagate - Entry Point
//!
//! Starts the forward server, the blacklist refresher and, in local mode,
//! the health scheduler, with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rotagate::backend::{BackendClient, BackendConfig};
use rotagate::blacklist::{BlacklistCache, BlacklistSource, StaticBlacklistSource};
use rotagate::config::{Config, IssuerMode, LogConfig};
use rotagate::models::Proxy;
use rotagate::proxy::{
    ForwardServer, Forwarder, ForwarderConfig, LocalProxyIssuer, ProbeConfig, ProxyIssuer,
    ProxyProber, ReqwestUpstream, RotationSelector, StaticCredentialVerifier,
};
use rotagate::repository::{ActivityLogger, MemoryProxyStore, ProxyStore, TracingActivityLogger};
use rotagate::services::{HealthScheduler, HealthSchedulerConfig, HealthSchedulerHandle};
use rotagate::Result;

/// Collaborators the forwarder is wired to
struct Collaborators {
    issuer: Arc<dyn ProxyIssuer>,
    blacklist_source: Arc<dyn BlacklistSource>,
    activity: Arc<dyn ActivityLogger>,
    scheduler: Option<HealthScheduler>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log settings apply
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Rotagate");
    info!(
        mode = ?config.issuer_mode,
        primary = %config.forwarder.rotation_strategy,
        fallback = %config.forwarder.fallback_strategy,
        "Configuration loaded"
    );

    let collaborators = match config.issuer_mode {
        IssuerMode::Backend => backend_collaborators(&config)?,
        IssuerMode::Local => local_collaborators(&config),
    };

    // Blacklist cache with periodic refresh
    let blacklist = Arc::new(BlacklistCache::new(
        collaborators.blacklist_source,
        config.blacklist.refresh_interval,
    ));
    blacklist.start_auto_refresh();

    let forwarder = Arc::new(Forwarder::new(
        ForwarderConfig {
            primary_strategy: config.forwarder.rotation_strategy,
            fallback_strategy: config.forwarder.fallback_strategy,
            retry_count: config.forwarder.retry_count,
            max_concurrent_requests: config.forwarder.max_concurrent_requests,
            require_credential: config.forwarder.require_user_credential,
            default_credential: config.forwarder.default_user_credential.clone(),
        },
        blacklist.clone(),
        collaborators.issuer,
        Arc::new(ReqwestUpstream::new(config.forwarder.upstream_timeout)),
        collaborators.activity,
    ));

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start health scheduler
    let (scheduler_handle, scheduler_shutdown) = HealthSchedulerHandle::new();
    let scheduler_task = collaborators.scheduler.map(|scheduler| {
        tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        })
    });

    // Start forward server
    let server = ForwardServer::new(
        config.forwarder.host.clone(),
        config.forwarder.port,
        forwarder,
    );
    let server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            error!("Forward server error: {}", e);
        }
    });

    info!("Forward server started on {}", config.forwarder_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    scheduler_handle.shutdown();
    blacklist.stop_auto_refresh();

    let _ = server_task.await;
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }

    info!("Rotagate stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rotagate={}", log.level).into());

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn backend_collaborators(config: &Config) -> Result<Collaborators> {
    let backend = Arc::new(BackendClient::new(BackendConfig {
        base_url: config.backend.base_url.clone(),
        proxy_endpoint: config.backend.proxy_endpoint.clone(),
        blacklist_endpoint: config.backend.blacklist_endpoint.clone(),
        activity_endpoint: config.backend.activity_endpoint.clone(),
        system_token: config.backend.system_token.clone(),
        timeout: config.backend.timeout,
    })?);
    info!("Using management backend at {}", config.backend.base_url);

    Ok(Collaborators {
        issuer: backend.clone(),
        blacklist_source: backend.clone(),
        activity: backend,
        scheduler: None,
    })
}

fn local_collaborators(config: &Config) -> Collaborators {
    let proxies: Vec<Proxy> = config
        .local
        .proxies
        .iter()
        .zip(1..)
        .filter_map(|(raw, id)| match Proxy::from_url(id, raw) {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                warn!("Skipping proxy {}: {}", raw, e);
                None
            }
        })
        .collect();
    info!("Loaded {} local proxies", proxies.len());

    let store: Arc<dyn ProxyStore> = Arc::new(MemoryProxyStore::with_proxies(proxies));
    let selector = Arc::new(RotationSelector::new(store.clone()));

    let mut issuer = LocalProxyIssuer::new(store.clone(), selector);
    if !config.local.credentials.is_empty() {
        issuer = issuer.with_verifier(Arc::new(StaticCredentialVerifier::new(
            config.local.credentials.clone(),
        )));
    }

    let prober = ProxyProber::http(ProbeConfig {
        target_url: config.local.probe_test_url.clone(),
        timeout: config.local.probe_timeout,
        max_workers: config.local.probe_max_workers,
    });
    let scheduler = HealthScheduler::new(
        store,
        prober,
        HealthSchedulerConfig {
            check_interval: config.local.probe_interval,
        },
    );

    Collaborators {
        issuer: Arc::new(issuer),
        blacklist_source: Arc::new(StaticBlacklistSource::from_patterns(
            config.blacklist.local_patterns.iter().cloned(),
        )),
        activity: Arc::new(TracingActivityLogger),
        scheduler: Some(scheduler),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
