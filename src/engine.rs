//! Engine bootstrap: wires components C1-C9 plus the process endpoints
//! server as explicit dependencies (no globals, per §5) and owns the
//! single shutdown signal every long-running task subscribes to.

use crate::cache::KlineCache;
use crate::config::{Config, ExecutionMode};
use crate::executor::{LiveExecutor, PaperExecutor};
use crate::infrastructure::event_bus::{CandleCloseBus, PositionEventBus, SignalEventBus};
use crate::infrastructure::health::{self, HealthFlags, Metrics};
use crate::lifecycle::oracle_client::OracleClient;
use crate::lifecycle::{PositionSink, SignalLifecycleManager};
use crate::market_data::MarketDataAggregator;
use crate::monitor::PositionMonitor;
use crate::persistence::memory::InMemoryStore;
use crate::persistence::sqlite::SqliteStore;
use crate::persistence::{DecisionRepository, PositionRepository, SignalRepository, StrategyRepository};
use crate::sandbox::StrategyRuntime;
use crate::scheduler::StrategyScheduler;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Grace period given to in-flight work after a shutdown signal before the
/// process exits regardless (§5).
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(30);

/// Everything the bootstrapped process needs to run and later shut down
/// cleanly. Each field is a handle a caller (`main`) spawns a task around;
/// the engine itself holds no background tasks until [`Engine::run`].
pub struct Engine {
    config: Config,
    cache: KlineCache,
    candle_bus: CandleCloseBus,
    signal_bus: SignalEventBus,
    position_bus: PositionEventBus,
    signal_repo: Arc<dyn SignalRepository>,
    position_repo: Arc<dyn PositionRepository>,
    decision_repo: Arc<dyn DecisionRepository>,
    strategy_repo: Arc<dyn StrategyRepository>,
    aggregator: Arc<MarketDataAggregator>,
    scheduler: Arc<StrategyScheduler>,
    lifecycle: Arc<SignalLifecycleManager>,
    monitor: Arc<PositionMonitor>,
    health_flags: HealthFlags,
    metrics: Arc<Metrics>,
    reload_tx: mpsc::Sender<()>,
    reload_rx: Option<mpsc::Receiver<()>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Opens the configured store, falling back to an in-memory one on
/// connection failure rather than block startup (§4.9). The fallback is
/// only acceptable at bootstrap: once running, a store outage is surfaced
/// through [`HealthFlags::set_store_reachable`] instead of silently
/// swapping backends mid-flight.
async fn open_store(config: &Config) -> Arc<dyn StoreHandle> {
    match SqliteStore::new(&format!("sqlite://{}", config.store.sqlite_path)).await {
        Ok(store) => {
            info!(path = %config.store.sqlite_path, "opened sqlite store");
            Arc::new(store)
        }
        Err(e) => {
            warn!(error = %e, "failed to open sqlite store, falling back to in-memory store");
            Arc::new(InMemoryStore::new())
        }
    }
}

/// Blanket marker so [`open_store`] can return one `Arc` implementing all
/// four repository ports, regardless of which concrete store backs it.
trait StoreHandle: SignalRepository + PositionRepository + DecisionRepository + StrategyRepository {}
impl StoreHandle for SqliteStore {}
impl StoreHandle for InMemoryStore {}

impl Engine {
    pub async fn build(config: Config) -> Result<Self> {
        let cache = KlineCache::new();
        let candle_bus = CandleCloseBus::new();
        let signal_bus = SignalEventBus::new();
        let position_bus = PositionEventBus::new();

        let store = open_store(&config).await;
        let signal_repo: Arc<dyn SignalRepository> = store.clone();
        let position_repo: Arc<dyn PositionRepository> = store.clone();
        let decision_repo: Arc<dyn DecisionRepository> = store.clone();
        let strategy_repo: Arc<dyn StrategyRepository> = store;

        let aggregator = Arc::new(MarketDataAggregator::new(
            config.exchange.ws_base_url.clone(),
            cache.clone(),
            candle_bus.clone(),
        ));

        let runtime = Arc::new(StrategyRuntime::new());
        let scheduler = Arc::new(StrategyScheduler::new(
            runtime,
            cache.clone(),
            candle_bus.clone(),
            signal_bus.clone(),
            signal_repo.clone(),
            strategy_repo.clone(),
        ));

        let executor: Arc<dyn PositionSink> = match config.trading.mode {
            ExecutionMode::Paper => Arc::new(PaperExecutor::new(
                cache.clone(),
                position_repo.clone(),
                position_bus.clone(),
            )),
            ExecutionMode::Live => Arc::new(LiveExecutor::new(
                config.exchange.api_key.clone(),
                config.exchange.api_secret.clone(),
                config.exchange.rest_base_url.clone(),
                position_repo.clone(),
                position_bus.clone(),
            )),
        };

        let oracle = Arc::new(OracleClient::new(config.oracle.base_url.clone()));

        let lifecycle = Arc::new(SignalLifecycleManager::new(
            cache.clone(),
            oracle,
            signal_repo.clone(),
            position_repo.clone(),
            decision_repo.clone(),
            strategy_repo.clone(),
            candle_bus.clone(),
            signal_bus.clone(),
            position_bus.clone(),
            executor.clone(),
        ));

        let monitor = Arc::new(PositionMonitor::new(cache.clone(), position_repo.clone(), executor));

        let health_flags = HealthFlags::new();
        health_flags.set_store_reachable(true);
        let metrics = Metrics::new();

        let (reload_tx, reload_rx) = mpsc::channel(1);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            cache,
            candle_bus,
            signal_bus,
            position_bus,
            signal_repo,
            position_repo,
            decision_repo,
            strategy_repo,
            aggregator,
            scheduler,
            lifecycle,
            monitor,
            health_flags,
            metrics,
            reload_tx,
            reload_rx: Some(reload_rx),
            shutdown_tx,
        })
    }

    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Loads the active strategy set and spawns every long-running
    /// component, then blocks until the shutdown signal fires and all
    /// tasks have wound down (or [`SHUTDOWN_GRACE`] has elapsed).
    pub async fn run(mut self) -> Result<()> {
        let loaded = self.scheduler.reload().await?;
        info!(strategy_count = loaded, "loaded strategy set");

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut reload_rx = self.reload_rx.take().expect("run called once");

        let aggregator = self.aggregator.clone();
        let symbols = self.config.exchange.symbols.clone();
        let aggregator_shutdown = shutdown.clone();
        let aggregator_flags = self.health_flags.clone();
        let aggregator_task = tokio::spawn(async move {
            aggregator_flags.set_ws_connected(true);
            aggregator
                .run(symbols, vec![crate::domain::Interval::OneMinute], aggregator_shutdown)
                .await;
        });

        let scheduler = self.scheduler.clone();
        let scheduler_shutdown = shutdown.clone();
        let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

        let lifecycle = self.lifecycle.clone();
        let lifecycle_shutdown = shutdown.clone();
        let lifecycle_task = tokio::spawn(async move { lifecycle.run(lifecycle_shutdown).await });

        let monitor = self.monitor.clone();
        let monitor_shutdown = shutdown.clone();
        let monitor_task = tokio::spawn(async move { monitor.run(monitor_shutdown).await });

        let scheduler_for_reload = self.scheduler.clone();
        let mut reload_shutdown = shutdown.clone();
        let reload_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(()) = reload_rx.recv() => {
                        match scheduler_for_reload.reload().await {
                            Ok(count) => info!(strategy_count = count, "strategies reloaded on request"),
                            Err(e) => warn!(error = %e, "strategy reload failed"),
                        }
                    }
                    _ = reload_shutdown.changed() => {
                        if *reload_shutdown.borrow() {
                            return;
                        }
                    }
                    else => return,
                }
            }
        });

        let health_task = if self.config.observability.enabled {
            let bind_address = self.config.observability.bind_address.clone();
            let port = self.config.observability.port;
            let flags = self.health_flags.clone();
            let metrics = self.metrics.clone();
            let reload_tx = self.reload_tx.clone();
            let shutdown_tx = self.shutdown_tx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = health::serve(&bind_address, port, flags, metrics, reload_tx, shutdown_tx).await {
                    warn!(error = %e, "process endpoints server exited");
                }
            }))
        } else {
            None
        };

        shutdown.changed().await.ok();
        info!("shutdown signal received, waiting up to {:?} for tasks to drain", SHUTDOWN_GRACE);

        let drain = async {
            let _ = tokio::join!(aggregator_task, scheduler_task, lifecycle_task, monitor_task, reload_task);
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("shutdown grace period elapsed with tasks still running");
        }
        if let Some(task) = health_task {
            task.abort();
        }

        Ok(())
    }

    pub fn cache(&self) -> &KlineCache {
        &self.cache
    }

    pub fn signal_repo(&self) -> &Arc<dyn SignalRepository> {
        &self.signal_repo
    }
}
