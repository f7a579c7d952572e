//! Signal lifecycle manager (C6): the sole mutator of Signal state and
//! Decision rows. Advances each monitored signal through
//! `new -> monitoring -> {ready -> position_open -> closed, expired}`
//! exactly as encoded in [`SignalLifecycle::can_transition`], calling the
//! AI oracle on every qualifying candle close and driving the trade
//! executor (C7) through the [`PositionSink`] port.

pub mod oracle_client;

use crate::cache::KlineCache;
use crate::domain::errors::ExecutionError;
use crate::domain::events::{CandleClose, PositionClosed, SignalCreated};
use crate::domain::position::{CloseReason, PositionSide};
use crate::domain::signal::SignalState;
use crate::domain::{Decision, DecisionKind, Position, SignalLifecycle, Strategy, TradePlan};
use crate::indicators::compute_standard_set;
use crate::infrastructure::event_bus::{CandleCloseBus, PositionEventBus, SignalEventBus};
use crate::lifecycle::oracle_client::OracleClient;
use crate::persistence::{DecisionRepository, PositionRepository, SignalRepository, StrategyRepository};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// The C7 operations the lifecycle manager drives. Implemented by the
/// paper and live trade executors.
#[async_trait]
pub trait PositionSink: Send + Sync {
    async fn open_position(
        &self,
        signal: &SignalLifecycle,
        side: PositionSide,
        trade_plan: &TradePlan,
    ) -> Result<Position, ExecutionError>;

    async fn update_stop_loss(&self, position_id: Uuid, new_stop_loss: Decimal) -> Result<(), ExecutionError>;

    async fn update_take_profit(&self, position_id: Uuid, new_take_profit: Decimal) -> Result<(), ExecutionError>;

    async fn close(&self, position_id: Uuid, reason: CloseReason) -> Result<(), ExecutionError>;

    async fn reduce(&self, position_id: Uuid, fraction: Decimal) -> Result<(), ExecutionError>;
}

struct MonitoredSignal {
    signal: Arc<RwLock<SignalLifecycle>>,
    strategy: Strategy,
    lock: Arc<Mutex<()>>,
}

pub struct SignalLifecycleManager {
    cache: KlineCache,
    oracle: Arc<OracleClient>,
    signal_repo: Arc<dyn SignalRepository>,
    position_repo: Arc<dyn PositionRepository>,
    decision_repo: Arc<dyn DecisionRepository>,
    strategy_repo: Arc<dyn StrategyRepository>,
    candle_bus: CandleCloseBus,
    signal_event_bus: SignalEventBus,
    position_bus: PositionEventBus,
    executor: Arc<dyn PositionSink>,
    monitored: Arc<RwLock<HashMap<Uuid, MonitoredSignal>>>,
    symbol_index: Arc<RwLock<HashMap<String, Vec<Uuid>>>>,
}

impl SignalLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: KlineCache,
        oracle: Arc<OracleClient>,
        signal_repo: Arc<dyn SignalRepository>,
        position_repo: Arc<dyn PositionRepository>,
        decision_repo: Arc<dyn DecisionRepository>,
        strategy_repo: Arc<dyn StrategyRepository>,
        candle_bus: CandleCloseBus,
        signal_event_bus: SignalEventBus,
        position_bus: PositionEventBus,
        executor: Arc<dyn PositionSink>,
    ) -> Self {
        Self {
            cache,
            oracle,
            signal_repo,
            position_repo,
            decision_repo,
            strategy_repo,
            candle_bus,
            signal_event_bus,
            position_bus,
            executor,
            monitored: Arc::new(RwLock::new(HashMap::new())),
            symbol_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut new_signals = self.signal_event_bus.subscribe();
        let mut candles = self.candle_bus.subscribe();
        let mut closed_positions = self.position_bus.subscribe();

        loop {
            tokio::select! {
                event = new_signals.recv() => {
                    match event {
                        Ok(created) => self.adopt_signal(created).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "lifecycle manager fell behind the signal-created bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
                event = candles.recv() => {
                    match event {
                        Ok(close) => self.handle_candle_close(close).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "lifecycle manager fell behind the candle-close bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
                event = closed_positions.recv() => {
                    match event {
                        Ok(closed) => self.handle_position_closed(closed).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "lifecycle manager fell behind the position-closed bus");
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

    async fn adopt_signal(&self, created: SignalCreated) {
        let Ok(signal) = self.signal_repo.get(created.signal_id).await else {
            warn!(signal_id = %created.signal_id, "adopted signal not found in store");
            return;
        };
        let Ok(strategy) = self.strategy_repo.get(created.strategy_id).await else {
            warn!(strategy_id = %created.strategy_id, "strategy not found for adopted signal");
            return;
        };

        if let Err(e) = self
            .signal_repo
            .advance_state(signal.id, SignalState::New, SignalState::Monitoring)
            .await
        {
            warn!(signal_id = %signal.id, error = %e, "failed to advance signal to monitoring");
            return;
        }

        let mut signal = signal;
        signal.state = SignalState::Monitoring;

        self.monitored.write().await.insert(
            signal.id,
            MonitoredSignal {
                signal: Arc::new(RwLock::new(signal)),
                strategy,
                lock: Arc::new(Mutex::new(())),
            },
        );
        self.symbol_index
            .write()
            .await
            .entry(created.symbol)
            .or_default()
            .push(created.signal_id);

        info!(signal_id = %created.signal_id, "signal adopted for monitoring");
    }

    async fn handle_position_closed(&self, closed: PositionClosed) {
        if let Err(e) = self
            .signal_repo
            .advance_state(closed.signal_id, SignalState::PositionOpen, SignalState::Closed)
            .await
        {
            warn!(signal_id = %closed.signal_id, error = %e, "failed to close signal after position close");
        }
        self.monitored.write().await.remove(&closed.signal_id);
        let mut index = self.symbol_index.write().await;
        if let Some(ids) = index.get_mut(&closed.symbol) {
            ids.retain(|id| *id != closed.signal_id);
        }
    }

    async fn handle_candle_close(&self, close: CandleClose) {
        let candidate_ids: Vec<Uuid> = {
            let index = self.symbol_index.read().await;
            index.get(&close.symbol).cloned().unwrap_or_default()
        };
        if candidate_ids.is_empty() {
            return;
        }

        for signal_id in candidate_ids {
            let entry = {
                let guard = self.monitored.read().await;
                guard.get(&signal_id).map(|m| (Arc::clone(&m.signal), m.strategy.clone(), Arc::clone(&m.lock)))
            };
            let Some((signal_handle, strategy, lock)) = entry else { continue };
            if strategy.trigger_interval != close.interval {
                continue;
            }

            let manager = self.clone_handles();
            let close = close.clone();
            tokio::spawn(async move {
                let _guard = lock.lock().await;
                manager.process_candle_for_signal(signal_handle, strategy, close).await;
            });
        }
    }

    fn clone_handles(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            oracle: Arc::clone(&self.oracle),
            signal_repo: Arc::clone(&self.signal_repo),
            position_repo: Arc::clone(&self.position_repo),
            decision_repo: Arc::clone(&self.decision_repo),
            strategy_repo: Arc::clone(&self.strategy_repo),
            candle_bus: self.candle_bus.clone(),
            signal_event_bus: self.signal_event_bus.clone(),
            position_bus: self.position_bus.clone(),
            executor: Arc::clone(&self.executor),
            monitored: Arc::clone(&self.monitored),
            symbol_index: Arc::clone(&self.symbol_index),
        }
    }

    async fn process_candle_for_signal(&self, signal_handle: Arc<RwLock<SignalLifecycle>>, strategy: Strategy, close: CandleClose) {
        let (current_state, accepts, signal_snapshot) = {
            let guard = signal_handle.read().await;
            (guard.state, guard.accepts_candle(close.candle.open_time), guard.clone())
        };

        if !accepts || !matches!(current_state, SignalState::Monitoring | SignalState::PositionOpen) {
            return;
        }

        let candles = self.cache.get_latest(&close.symbol, close.interval, strategy.bar_history_limit).await;
        let indicators = compute_standard_set(&candles);
        let candle_history = serde_json::to_value(&candles).unwrap_or(serde_json::Value::Null);
        let previous_decisions = self.decision_repo.list_for_signal(signal_snapshot.id).await.unwrap_or_default();

        let decision = match self
            .oracle
            .decide(
                &signal_snapshot,
                &strategy.strategy_instructions,
                &candle_history,
                &indicators,
                &previous_decisions,
                close.candle.open_time,
            )
            .await
        {
            Ok(d) => d,
            Err(e) => {
                self.record_signal_error(&signal_handle, e.to_string()).await;
                return;
            }
        };

        let _ = self.decision_repo.append(&decision).await;

        // `decision_count`/`decision_budget` bound pre-entry analysis only;
        // position-management calls after entry advance `last_candle_time`
        // (so a candle is never re-processed) without touching the budget.
        {
            let mut guard = signal_handle.write().await;
            if current_state == SignalState::Monitoring {
                guard.record_decision(close.candle.open_time);
            } else {
                guard.last_candle_time = close.candle.open_time;
            }
            guard.consecutive_errors = 0;
        }

        match current_state {
            SignalState::Monitoring => self.apply_monitoring_decision(&signal_handle, &decision).await,
            SignalState::PositionOpen => self.apply_position_decision(&signal_handle, &decision).await,
            _ => unreachable!(),
        }

        let updated = signal_handle.read().await.clone();
        let _ = self.signal_repo.update(&updated).await;
    }

    async fn apply_monitoring_decision(&self, signal_handle: &Arc<RwLock<SignalLifecycle>>, decision: &Decision) {
        let signal_id = signal_handle.read().await.id;

        match decision.kind {
            DecisionKind::Enter => {
                let Some(plan) = &decision.trade_plan else {
                    warn!(signal_id = %signal_id, "enter decision carried no trade plan, treating as hold");
                    return;
                };
                let (Some(entry), Some(stop_loss)) = (plan.entry, plan.stop_loss) else {
                    warn!(signal_id = %signal_id, "enter decision missing entry/stop_loss, treating as hold");
                    return;
                };
                let side = infer_side(entry, stop_loss);

                if self
                    .signal_repo
                    .advance_state(signal_id, SignalState::Monitoring, SignalState::Ready)
                    .await
                    .is_err()
                {
                    return;
                }
                signal_handle.write().await.state = SignalState::Ready;

                let snapshot = signal_handle.read().await.clone();
                match self.executor.open_position(&snapshot, side, plan).await {
                    Ok(position) => {
                        let _ = self.position_repo.upsert(&position).await;
                        if self
                            .signal_repo
                            .advance_state(signal_id, SignalState::Ready, SignalState::PositionOpen)
                            .await
                            .is_ok()
                        {
                            let mut guard = signal_handle.write().await;
                            guard.state = SignalState::PositionOpen;
                            guard.open_position_id = Some(position.id);
                        }
                    }
                    Err(e) => {
                        warn!(signal_id = %signal_id, error = %e, "failed to open position for enter decision");
                    }
                }
            }
            DecisionKind::Continue => {
                let mut guard = signal_handle.write().await;
                if guard.budget_exhausted() {
                    guard.state = SignalState::Expired;
                    drop(guard);
                    let _ = self
                        .signal_repo
                        .advance_state(signal_id, SignalState::Monitoring, SignalState::Expired)
                        .await;
                }
            }
            DecisionKind::Abandon => {
                signal_handle.write().await.state = SignalState::Expired;
                let _ = self
                    .signal_repo
                    .advance_state(signal_id, SignalState::Monitoring, SignalState::Expired)
                    .await;
                self.monitored.write().await.remove(&signal_id);
            }
            _ => {
                // Hold and position-management decisions are no-ops before entry.
            }
        }
    }

    /// Manages an already-open position per oracle guidance. These calls do
    /// not count against `decision_budget` — that ceiling bounds pre-entry
    /// analysis passes, not ongoing position management.
    async fn apply_position_decision(&self, signal_handle: &Arc<RwLock<SignalLifecycle>>, decision: &Decision) {
        let Some(position_id) = signal_handle.read().await.open_position_id else {
            return;
        };

        let result = match decision.kind {
            DecisionKind::AdjustStopLoss => match decision.trade_plan.as_ref().and_then(|p| p.stop_loss) {
                Some(sl) => self.executor.update_stop_loss(position_id, sl).await,
                None => Ok(()),
            },
            DecisionKind::AdjustTakeProfit => match decision.trade_plan.as_ref().and_then(|p| p.take_profit) {
                Some(tp) => self.executor.update_take_profit(position_id, tp).await,
                None => Ok(()),
            },
            DecisionKind::Reduce => {
                let fraction = decision
                    .trade_plan
                    .as_ref()
                    .and_then(|p| p.position_size)
                    .unwrap_or(Decimal::new(5, 1));
                self.executor.reduce(position_id, fraction).await
            }
            DecisionKind::Close | DecisionKind::Abandon => self.executor.close(position_id, CloseReason::AiClose).await,
            _ => Ok(()),
        };

        if let Err(e) = result {
            warn!(position_id = %position_id, error = %e, "position management action failed");
        }
    }

    async fn record_signal_error(&self, signal_handle: &Arc<RwLock<SignalLifecycle>>, reason: String) {
        let (signal_id, expired, current_state) = {
            let mut guard = signal_handle.write().await;
            let expired = guard.record_error();
            if expired {
                guard.state = SignalState::Expired;
            }
            (guard.id, expired, guard.state)
        };
        warn!(signal_id = %signal_id, reason, "oracle call failed for signal");
        if expired {
            let _ = self
                .signal_repo
                .advance_state(signal_id, SignalState::Monitoring, SignalState::Expired)
                .await;
            self.monitored.write().await.remove(&signal_id);
        } else {
            let snapshot = signal_handle.read().await.clone();
            let _ = self.signal_repo.update(&snapshot).await;
        }
        let _ = current_state;
    }
}

/// Infers position direction from the oracle's entry/stop-loss pair: a
/// stop below entry implies a long, a stop above entry implies a short.
/// The oracle protocol (§6) carries no explicit side field.
fn infer_side(entry: Decimal, stop_loss: Decimal) -> PositionSide {
    if stop_loss <= entry {
        PositionSide::Long
    } else {
        PositionSide::Short
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_long_when_stop_is_below_entry() {
        assert_eq!(infer_side(Decimal::new(50000, 0), Decimal::new(49000, 0)), PositionSide::Long);
    }

    #[test]
    fn infers_short_when_stop_is_above_entry() {
        assert_eq!(infer_side(Decimal::new(50000, 0), Decimal::new(51000, 0)), PositionSide::Short);
    }
}
