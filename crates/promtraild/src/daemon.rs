//! Assembles the store, the background loops and the HTTP server.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use promtrail_ingest::QueryIngester;
use promtrail_inventory::{InventorySyncer, PrometheusClient};
use promtrail_leader::{
    InProcessLocks, LeaderFlag, LeadershipCoordinator, campaign, lock_key_for,
};
use promtrail_metrics::Metrics;
use promtrail_retention::RetentionWorker;
use promtrail_state::{Provider, StateStore};

use crate::api::{AppState, build_router};
use crate::config::{DaemonConfig, LeaderMode, LeaderSection, StorageSection};

/// Advisory-lock name of the inventory sync loop.
pub const INVENTORY_LOCK: &str = "promtrail/inventory-sync";
/// Advisory-lock name of the retention loop.
pub const RETENTION_LOCK: &str = "promtrail/retention";

pub fn open_store(storage: &StorageSection) -> anyhow::Result<StateStore> {
    if storage.in_memory {
        return Ok(StateStore::open_in_memory()?);
    }
    if let Some(dir) = storage.path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(StateStore::open(&storage.path)?)
}

/// Coordinator for the configured leader mode, or `None` to run leaderless.
pub fn leadership(
    leader: &LeaderSection,
    provider: &dyn Provider,
) -> anyhow::Result<Option<LeadershipCoordinator>> {
    let coordinator = match leader.mode {
        LeaderMode::Leaderless => None,
        LeaderMode::Auto => LeadershipCoordinator::for_provider(provider).ok(),
        LeaderMode::Required => Some(LeadershipCoordinator::for_provider(provider)?),
        LeaderMode::InProcess => Some(LeadershipCoordinator::new(Arc::new(InProcessLocks::new()))),
    };
    Ok(coordinator.map(|c| c.with_retry_backoff(leader.retry_backoff)))
}

/// Run until Ctrl-C.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.server.listen).await?;
    run_with(config, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
    })
    .await
}

/// Run on `listener` until `signal` completes, then stop every loop and
/// close the store.
pub async fn run_with<S>(
    config: DaemonConfig,
    listener: TcpListener,
    signal: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    info!("promtrail daemon starting");

    let store = open_store(&config.storage)?;
    info!(in_memory = config.storage.in_memory, path = ?config.storage.path, "state store opened");
    let provider: Arc<dyn Provider> = Arc::new(store);
    let metrics = Arc::new(Metrics::new());

    // Validate everything before spawning anything.
    let ingester = QueryIngester::new(
        Arc::clone(&provider),
        config.ingest.to_config(),
        Arc::clone(&metrics),
    )?;
    let syncer = if config.inventory.enabled {
        let client = PrometheusClient::new(&config.upstream.url, config.upstream.request_timeout)?;
        Some(InventorySyncer::new(
            Arc::clone(&provider),
            Arc::new(client),
            config.inventory.to_config(),
            Arc::clone(&metrics),
        )?)
    } else {
        None
    };
    let retention = if config.retention.enabled {
        Some(RetentionWorker::new(
            Arc::clone(&provider),
            config.retention.to_config(),
            Arc::clone(&metrics),
        )?)
    } else {
        None
    };
    let coordinator = leadership(&config.leader, provider.as_ref())?;
    info!(
        mode = ?config.leader.mode,
        gated = coordinator.is_some(),
        "leadership resolved"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    // ── Background tasks ───────────────────────────────────────

    let handle = ingester.handle();
    tasks.push(("ingester", tokio::spawn(ingester.run(shutdown_rx.clone()))));

    if let Some(syncer) = syncer {
        let shutdown = shutdown_rx.clone();
        let task = match coordinator.clone() {
            Some(coordinator) => {
                let flag = LeaderFlag::new();
                tasks.push((
                    "inventory-campaign",
                    tokio::spawn(campaign(
                        coordinator,
                        shutdown_rx.clone(),
                        lock_key_for(INVENTORY_LOCK),
                        flag.clone(),
                    )),
                ));
                tokio::spawn(async move {
                    syncer
                        .run_with_leader(shutdown, move || flag.is_leader())
                        .await;
                })
            }
            None => tokio::spawn(async move { syncer.run_leaderless(shutdown).await }),
        };
        tasks.push(("inventory", task));
    }

    if let Some(worker) = retention {
        let shutdown = shutdown_rx.clone();
        let task = match coordinator {
            Some(coordinator) => tokio::spawn(async move {
                coordinator
                    .with_leadership(shutdown, lock_key_for(RETENTION_LOCK), move |shutdown| {
                        async move { worker.run_loop(shutdown).await }
                    })
                    .await;
            }),
            None => tokio::spawn(async move { worker.run_loop(shutdown).await }),
        };
        tasks.push(("retention", task));
    }

    // ── API server ─────────────────────────────────────────────

    let router = build_router(AppState {
        ingest: handle,
        metrics: Arc::clone(&metrics),
        ignore_ranges: config.ingest.ignore_ranges,
    });
    info!(addr = %listener.local_addr()?, "API server starting");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("shutdown signal received");
        })
        .await;
    // Stop the loops however the server exited.
    let _ = shutdown_tx.send(true);

    // Wait for background tasks.
    for (name, task) in tasks {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "background task panicked");
        }
    }

    if let Err(e) = provider.close().await {
        warn!(error = %e, "failed to close state store");
    }
    served?;
    info!("promtrail daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use promtrail_state::MemoryProvider;

    fn section(mode: LeaderMode) -> LeaderSection {
        LeaderSection {
            mode,
            ..LeaderSection::default()
        }
    }

    #[test]
    fn auto_follows_provider_capability() {
        let plain = MemoryProvider::new();
        assert!(leadership(&section(LeaderMode::Auto), &plain).unwrap().is_none());

        let locking = MemoryProvider::new().with_advisory_locks(Arc::new(InProcessLocks::new()));
        assert!(leadership(&section(LeaderMode::Auto), &locking).unwrap().is_some());
    }

    #[test]
    fn forced_modes() {
        let plain = MemoryProvider::new();
        assert!(leadership(&section(LeaderMode::Leaderless), &plain).unwrap().is_none());
        assert!(leadership(&section(LeaderMode::InProcess), &plain).unwrap().is_some());
        assert!(leadership(&section(LeaderMode::Required), &plain).is_err());
    }

    #[test]
    fn in_memory_store_needs_no_path() {
        let storage = StorageSection {
            path: "/nonexistent/never-created.redb".into(),
            in_memory: true,
        };
        assert!(open_store(&storage).is_ok());
    }
}
