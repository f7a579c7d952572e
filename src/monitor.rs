//! Position monitor (C8): a 1 Hz sweep over every open position that
//! updates unrealized PnL, re-anchors trailing stops, and submits close
//! intents to the trade executor when a stop-loss or take-profit level is
//! crossed. Stop-loss wins the tie-break when both cross in the same
//! sweep (§4.8).

use crate::domain::candle::Interval;
use crate::domain::position::CloseReason;
use crate::domain::Position;
use crate::cache::KlineCache;
use crate::lifecycle::PositionSink;
use crate::persistence::PositionRepository;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MARK_INTERVAL: Interval = Interval::OneMinute;

pub struct PositionMonitor {
    cache: KlineCache,
    position_repo: Arc<dyn PositionRepository>,
    executor: Arc<dyn PositionSink>,
}

impl PositionMonitor {
    pub fn new(cache: KlineCache, position_repo: Arc<dyn PositionRepository>, executor: Arc<dyn PositionSink>) -> Self {
        Self { cache, position_repo, executor }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("position monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) {
        let open_positions = match self.position_repo.list_open().await {
            Ok(positions) => positions,
            Err(e) => {
                error!(error = %e, "position monitor could not list open positions");
                return;
            }
        };

        for position in open_positions {
            let latest = self.cache.get_latest(&position.symbol, MARK_INTERVAL, 1).await;
            let Some(mark) = latest.last().map(|c| c.close) else { continue };
            self.evaluate_position(position, mark).await;
        }
    }

    /// Persists bookkeeping (unrealized PnL, trailing-stop re-anchor, or a
    /// filled take-profit level) before handing off the actual close/reduce
    /// to the executor, which re-fetches the position and is the sole
    /// mutator of `quantity`/`state` thereafter — writing a stale copy
    /// here must never race the executor's own upsert.
    async fn evaluate_position(&self, mut position: Position, mark: Decimal) {
        position.unrealized_pnl = position.unrealized_pnl_at(mark);

        if position.triggers_stop_loss(mark) {
            let _ = self.position_repo.upsert(&position).await;
            if let Err(e) = self.executor.close(position.id, CloseReason::StopLoss).await {
                warn!(position_id = %position.id, error = %e, "stop-loss close intent failed");
            }
            return;
        }

        if let Some(level_idx) = position.crossed_take_profit(mark) {
            let is_last_level = position.take_profit.len() == 1;
            if is_last_level {
                let _ = self.position_repo.upsert(&position).await;
                if let Err(e) = self.executor.close(position.id, CloseReason::TakeProfit).await {
                    warn!(position_id = %position.id, error = %e, "take-profit close intent failed");
                }
            } else {
                let fraction = position.take_profit[level_idx].close_fraction;
                position.take_profit[level_idx].filled = true;
                let _ = self.position_repo.upsert(&position).await;
                if let Err(e) = self.executor.reduce(position.id, fraction).await {
                    warn!(position_id = %position.id, error = %e, "partial take-profit intent failed");
                }
            }
            return;
        }

        position.update_trailing_stop(mark);
        let _ = self.position_repo.upsert(&position).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::position::{PositionMode, PositionSide, PositionState, TakeProfitLevel};
    use crate::domain::{SignalLifecycle, TradePlan};
    use crate::persistence::memory::InMemoryStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct RecordingSink {
        closed: Mutex<Vec<(Uuid, CloseReason)>>,
        reduced: Mutex<Vec<(Uuid, Decimal)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { closed: Mutex::new(Vec::new()), reduced: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl PositionSink for RecordingSink {
        async fn open_position(
            &self,
            _signal: &SignalLifecycle,
            _side: PositionSide,
            _trade_plan: &TradePlan,
        ) -> Result<Position, crate::domain::errors::ExecutionError> {
            unimplemented!()
        }
        async fn update_stop_loss(&self, _position_id: Uuid, _new: Decimal) -> Result<(), crate::domain::errors::ExecutionError> {
            Ok(())
        }
        async fn update_take_profit(&self, _position_id: Uuid, _new: Decimal) -> Result<(), crate::domain::errors::ExecutionError> {
            Ok(())
        }
        async fn close(&self, position_id: Uuid, reason: CloseReason) -> Result<(), crate::domain::errors::ExecutionError> {
            self.closed.lock().unwrap().push((position_id, reason));
            Ok(())
        }
        async fn reduce(&self, position_id: Uuid, fraction: Decimal) -> Result<(), crate::domain::errors::ExecutionError> {
            self.reduced.lock().unwrap().push((position_id, fraction));
            Ok(())
        }
    }

    fn position(stop_loss: Decimal, take_profit: Vec<TakeProfitLevel>) -> Position {
        Position {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            entry_price: dec!(100),
            quantity: dec!(1),
            stop_loss,
            take_profit,
            trailing_stop_pct: None,
            high_water_mark: None,
            low_water_mark: None,
            mode: PositionMode::Paper,
            state: PositionState::Open,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            opened_at: 0,
            closed_at: None,
            close_reason: None,
        }
    }

    async fn seeded_cache(mark: Decimal) -> KlineCache {
        let cache = KlineCache::new();
        cache
            .append_or_update(Candle {
                symbol: "BTCUSDT".into(),
                interval: MARK_INTERVAL,
                open_time: 0,
                close_time: 59_999,
                open: mark,
                high: mark,
                low: mark,
                close: mark,
                volume: dec!(1),
                quote_volume: dec!(0),
                trade_count: 1,
                taker_buy_base_volume: dec!(0),
                taker_buy_quote_volume: dec!(0),
                is_closed: true,
            })
            .await;
        cache
    }

    #[tokio::test]
    async fn stop_loss_wins_when_both_sl_and_tp_cross_in_the_same_sweep() {
        let store = Arc::new(InMemoryStore::new());
        let pos = position(dec!(99), vec![TakeProfitLevel { price: dec!(101), close_fraction: dec!(1), filled: false }]);
        let position_id = pos.id;
        store.upsert(&pos).await.unwrap();

        let sink = Arc::new(RecordingSink::new());
        let cache = seeded_cache(dec!(95)).await;
        let monitor = PositionMonitor::new(cache, store.clone(), sink.clone());
        monitor.sweep_once().await;

        let closed = sink.closed.lock().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0], (position_id, CloseReason::StopLoss));
    }

    #[tokio::test]
    async fn single_take_profit_level_triggers_a_full_close() {
        let store = Arc::new(InMemoryStore::new());
        let pos = position(dec!(90), vec![TakeProfitLevel { price: dec!(110), close_fraction: dec!(1), filled: false }]);
        store.upsert(&pos).await.unwrap();

        let sink = Arc::new(RecordingSink::new());
        let cache = seeded_cache(dec!(115)).await;
        let monitor = PositionMonitor::new(cache, store.clone(), sink.clone());
        monitor.sweep_once().await;

        assert_eq!(sink.closed.lock().unwrap().len(), 1);
        assert!(sink.reduced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn multi_level_take_profit_triggers_a_partial_reduce() {
        let store = Arc::new(InMemoryStore::new());
        let pos = position(
            dec!(90),
            vec![
                TakeProfitLevel { price: dec!(105), close_fraction: dec!(0.5), filled: false },
                TakeProfitLevel { price: dec!(115), close_fraction: dec!(1), filled: false },
            ],
        );
        store.upsert(&pos).await.unwrap();

        let sink = Arc::new(RecordingSink::new());
        let cache = seeded_cache(dec!(106)).await;
        let monitor = PositionMonitor::new(cache, store.clone(), sink.clone());
        monitor.sweep_once().await;

        assert!(sink.closed.lock().unwrap().is_empty());
        assert_eq!(sink.reduced.lock().unwrap().len(), 1);
        assert_eq!(sink.reduced.lock().unwrap()[0].1, dec!(0.5));
    }
}
