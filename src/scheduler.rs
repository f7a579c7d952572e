//! Strategy scheduler (C5): evaluates every enabled strategy's sandboxed
//! filter against the symbol a candle just closed for, on a worker pool
//! sized to the host's CPU count. Detects a match edge-triggered (false ->
//! true) per `(strategy_id, symbol)`, constructs the resulting signal and
//! publishes it, and auto-disables a strategy after five consecutive
//! sandbox errors via [`Strategy::record_error`].

use crate::cache::KlineCache;
use crate::domain::errors::SandboxError;
use crate::domain::events::{CandleClose, SignalCreated};
use crate::domain::{Interval, SignalLifecycle, Strategy, Ticker};
use crate::infrastructure::event_bus::{CandleCloseBus, SignalEventBus};
use crate::persistence::{SignalRepository, StrategyRepository};
use crate::sandbox::{EvaluationContext, StrategyRuntime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// Per-strategy concurrent-evaluation cap, independent of the global
/// worker-pool size (default 10, per §4.5).
const DEFAULT_PER_STRATEGY_CONCURRENCY: usize = 10;

struct StrategySlot {
    strategy: Strategy,
    /// Serializes candle-close batches for this strategy so batch *k+1*
    /// never starts evaluating before batch *k* has finished.
    batch_lock: Arc<Mutex<()>>,
    concurrency: Arc<Semaphore>,
    previously_matched: Arc<Mutex<HashMap<String, bool>>>,
}

pub struct StrategyScheduler {
    runtime: Arc<StrategyRuntime>,
    cache: KlineCache,
    candle_bus: CandleCloseBus,
    signal_bus: SignalEventBus,
    signal_repo: Arc<dyn SignalRepository>,
    strategy_repo: Arc<dyn StrategyRepository>,
    strategies: Arc<RwLock<HashMap<Uuid, StrategySlot>>>,
    global_pool: Arc<Semaphore>,
    evaluations_run: Arc<AtomicU64>,
    matches_found: Arc<AtomicU64>,
}

impl StrategyScheduler {
    pub fn new(
        runtime: Arc<StrategyRuntime>,
        cache: KlineCache,
        candle_bus: CandleCloseBus,
        signal_bus: SignalEventBus,
        signal_repo: Arc<dyn SignalRepository>,
        strategy_repo: Arc<dyn StrategyRepository>,
    ) -> Self {
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            runtime,
            cache,
            candle_bus,
            signal_bus,
            signal_repo,
            strategy_repo,
            strategies: Arc::new(RwLock::new(HashMap::new())),
            global_pool: Arc::new(Semaphore::new(worker_count)),
            evaluations_run: Arc::new(AtomicU64::new(0)),
            matches_found: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn evaluations_run(&self) -> u64 {
        self.evaluations_run.load(Ordering::Relaxed)
    }

    pub fn matches_found(&self) -> u64 {
        self.matches_found.load(Ordering::Relaxed)
    }

    /// Loads (or reloads) the active strategy set from the repository. Used
    /// at bootstrap and by the `reload-strategies` control endpoint.
    pub async fn reload(&self) -> Result<usize, crate::domain::errors::PersistenceError> {
        let strategies = self.strategy_repo.list_enabled().await?;
        let count = strategies.len();

        let mut guard = self.strategies.write().await;
        guard.clear();
        for strategy in strategies {
            guard.insert(
                strategy.id,
                StrategySlot {
                    strategy,
                    batch_lock: Arc::new(Mutex::new(())),
                    concurrency: Arc::new(Semaphore::new(DEFAULT_PER_STRATEGY_CONCURRENCY)),
                    previously_matched: Arc::new(Mutex::new(HashMap::new())),
                },
            );
        }
        info!(strategy_count = count, "scheduler reloaded strategy set");
        Ok(count)
    }

    /// Runs forever, consuming candle-close events until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut candles = self.candle_bus.subscribe();
        loop {
            tokio::select! {
                event = candles.recv() => {
                    match event {
                        Ok(close) => self.handle_candle_close(close).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "scheduler fell behind the candle-close bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn handle_candle_close(&self, close: CandleClose) {
        let slots: Vec<(Uuid, Arc<Mutex<()>>, Arc<Semaphore>, Arc<Mutex<HashMap<String, bool>>>, Strategy)> = {
            let guard = self.strategies.read().await;
            guard
                .values()
                .filter(|slot| slot.strategy.enabled && slot.strategy.trigger_interval == close.interval)
                .map(|slot| {
                    (
                        slot.strategy.id,
                        Arc::clone(&slot.batch_lock),
                        Arc::clone(&slot.concurrency),
                        Arc::clone(&slot.previously_matched),
                        slot.strategy.clone(),
                    )
                })
                .collect()
        };

        for (strategy_id, batch_lock, concurrency, previously_matched, strategy) in slots {
            let runtime = Arc::clone(&self.runtime);
            let cache = self.cache.clone();
            let signal_bus = self.signal_bus.clone();
            let signal_repo = Arc::clone(&self.signal_repo);
            let strategy_repo = Arc::clone(&self.strategy_repo);
            let strategies = Arc::clone(&self.strategies);
            let global_pool = Arc::clone(&self.global_pool);
            let evaluations_run = Arc::clone(&self.evaluations_run);
            let matches_found = Arc::clone(&self.matches_found);
            let close = close.clone();

            tokio::spawn(async move {
                let _batch_guard = batch_lock.lock().await;
                let _global_permit = global_pool.acquire().await.expect("global pool semaphore closed");
                let _strategy_permit = concurrency.acquire().await.expect("strategy semaphore closed");

                evaluations_run.fetch_add(1, Ordering::Relaxed);

                let mut candle_windows = HashMap::new();
                for interval in &strategy.required_intervals {
                    let window = cache.get_latest(&close.symbol, *interval, strategy.bar_history_limit).await;
                    candle_windows.insert(*interval, window);
                }
                candle_windows.entry(close.interval).or_insert_with(Vec::new);

                let ticker = Ticker {
                    symbol: close.symbol.clone(),
                    last_price: close.candle.close,
                    price_change_percent_24h: rust_decimal::Decimal::ZERO,
                    volume_24h: close.candle.volume,
                };

                let ctx = EvaluationContext { ticker: &ticker, candles: &candle_windows };

                let outcome = runtime
                    .compile(&strategy_id.to_string(), &strategy.filter_source)
                    .and_then(|filter| runtime.run(&strategy_id.to_string(), &filter, &ctx));

                match outcome {
                    Ok(matched) => {
                        handle_match_result(
                            strategy_id,
                            &close,
                            matched,
                            &previously_matched,
                            &signal_bus,
                            signal_repo.as_ref(),
                            &strategy,
                        )
                        .await;
                        record_strategy_success(&strategies, strategy_id, strategy_repo.as_ref()).await;
                        if matched {
                            matches_found.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        warn!(strategy_id = %strategy_id, error = %e, "strategy evaluation failed");
                        record_strategy_error(&strategies, strategy_id, &e, strategy_repo.as_ref()).await;
                    }
                }
            });
        }
    }
}

async fn handle_match_result(
    strategy_id: Uuid,
    close: &CandleClose,
    matched: bool,
    previously_matched: &Mutex<HashMap<String, bool>>,
    signal_bus: &SignalEventBus,
    signal_repo: &dyn SignalRepository,
    strategy: &Strategy,
) {
    let mut guard = previously_matched.lock().await;
    let was_matched = guard.get(&close.symbol).copied().unwrap_or(false);
    guard.insert(close.symbol.clone(), matched);
    drop(guard);

    if matched && !was_matched {
        let signal = SignalLifecycle::new(
            strategy_id,
            close.symbol.clone(),
            close.close_time,
            close.candle.close,
            vec![format!("{strategy_id} matched on {}", close.interval)],
            strategy.decision_budget,
        );

        match signal_repo.insert_if_absent(&signal, close.close_time).await {
            Ok(true) => {
                info!(strategy_id = %strategy_id, symbol = %close.symbol, signal_id = %signal.id, "new signal");
                signal_bus.publish(SignalCreated {
                    signal_id: signal.id,
                    strategy_id,
                    symbol: close.symbol.clone(),
                });
            }
            Ok(false) => {
                // Already created for this candle by a previous scheduler pass.
            }
            Err(e) => {
                warn!(strategy_id = %strategy_id, error = %e, "failed to persist new signal");
            }
        }
    }
}

async fn record_strategy_success(
    strategies: &RwLock<HashMap<Uuid, StrategySlot>>,
    strategy_id: Uuid,
    strategy_repo: &dyn StrategyRepository,
) {
    let mut guard = strategies.write().await;
    if let Some(slot) = guard.get_mut(&strategy_id) {
        slot.strategy.record_success();
        let _ = strategy_repo.update(&slot.strategy).await;
    }
}

async fn record_strategy_error(
    strategies: &RwLock<HashMap<Uuid, StrategySlot>>,
    strategy_id: Uuid,
    error: &SandboxError,
    strategy_repo: &dyn StrategyRepository,
) {
    let mut guard = strategies.write().await;
    if let Some(slot) = guard.get_mut(&strategy_id) {
        slot.strategy.record_error(error.to_string());
        if !slot.strategy.enabled {
            warn!(strategy_id = %strategy_id, "strategy auto-disabled after repeated errors");
        }
        let _ = strategy_repo.update(&slot.strategy).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::strategy::FilterLanguage;
    use crate::persistence::memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn candle_close(symbol: &str, close_time: i64, price: f64) -> CandleClose {
        let candle = Candle {
            symbol: symbol.into(),
            interval: Interval::OneMinute,
            open_time: close_time - 59_999,
            close_time,
            open: rust_decimal::Decimal::try_from(price).unwrap(),
            high: rust_decimal::Decimal::try_from(price).unwrap(),
            low: rust_decimal::Decimal::try_from(price).unwrap(),
            close: rust_decimal::Decimal::try_from(price).unwrap(),
            volume: dec!(1),
            quote_volume: dec!(0),
            trade_count: 1,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: true,
        };
        CandleClose { symbol: symbol.into(), interval: Interval::OneMinute, candle, close_time }
    }

    fn always_match_strategy() -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            owner: None,
            enabled: true,
            filter_source: "price > 0".into(),
            filter_language: FilterLanguage::SandboxedScript,
            required_intervals: vec![Interval::OneMinute],
            trigger_interval: Interval::OneMinute,
            strategy_instructions: "test".into(),
            decision_budget: 5,
            bar_history_limit: 50,
            consecutive_errors: 0,
            disabled_reason: None,
        }
    }

    #[tokio::test]
    async fn edge_triggered_match_creates_exactly_one_signal() {
        let store = Arc::new(InMemoryStore::new());
        let strategy = always_match_strategy();
        store.seed_strategies(vec![strategy.clone()]);

        let scheduler = StrategyScheduler::new(
            Arc::new(StrategyRuntime::new()),
            KlineCache::new(),
            CandleCloseBus::new(),
            SignalEventBus::new(),
            store.clone(),
            store.clone(),
        );
        scheduler.reload().await.unwrap();

        let mut signal_events = scheduler.signal_bus.subscribe();

        scheduler.handle_candle_close(candle_close("BTCUSDT", 60_000, 100.0)).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        scheduler.handle_candle_close(candle_close("BTCUSDT", 120_000, 101.0)).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let first = signal_events.recv().await.unwrap();
        assert_eq!(first.strategy_id, strategy.id);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), signal_events.recv())
                .await
                .is_err(),
            "expected no second signal for the same still-matching strategy"
        );
    }
}
