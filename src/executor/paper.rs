//! Paper trade executor (§4.7 paper mode): fills at the supplied mark
//! price against a virtual USDT balance (default 10 000), charging 0.1%
//! commission on notional both ways. No order-book latency, no REST calls.

use crate::cache::KlineCache;
use crate::domain::errors::ExecutionError;
use crate::domain::events::PositionClosed;
use crate::domain::position::{CloseReason, PositionMode, PositionSide, PositionState, TakeProfitLevel};
use crate::domain::{Position, SignalLifecycle, TradePlan};
use crate::executor::sizing::{clamp_size_pct, quantity_for};
use crate::infrastructure::event_bus::PositionEventBus;
use crate::lifecycle::PositionSink;
use crate::persistence::PositionRepository;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

const DEFAULT_STARTING_BALANCE: Decimal = dec!(10000);
const COMMISSION_RATE: Decimal = dec!(0.001);
const DEFAULT_SIZE_PCT: Decimal = dec!(0.02);

pub struct PaperExecutor {
    cache: KlineCache,
    position_repo: Arc<dyn PositionRepository>,
    position_bus: PositionEventBus,
    balances: Mutex<HashMap<String, Decimal>>,
}

impl PaperExecutor {
    pub fn new(cache: KlineCache, position_repo: Arc<dyn PositionRepository>, position_bus: PositionEventBus) -> Self {
        Self {
            cache,
            position_repo,
            position_bus,
            balances: Mutex::new(HashMap::new()),
        }
    }

    async fn balance_for(&self, quote_asset: &str) -> Decimal {
        let mut guard = self.balances.lock().await;
        *guard.entry(quote_asset.to_string()).or_insert(DEFAULT_STARTING_BALANCE)
    }

    async fn adjust_balance(&self, quote_asset: &str, delta: Decimal) {
        let mut guard = self.balances.lock().await;
        let entry = guard.entry(quote_asset.to_string()).or_insert(DEFAULT_STARTING_BALANCE);
        *entry += delta;
    }

    async fn mark_price(&self, symbol: &str, fallback: Decimal) -> Decimal {
        for interval in [crate::domain::Interval::OneMinute] {
            let latest = self.cache.get_latest(symbol, interval, 1).await;
            if let Some(candle) = latest.last() {
                return candle.close;
            }
        }
        fallback
    }
}

#[async_trait]
impl PositionSink for PaperExecutor {
    async fn open_position(
        &self,
        signal: &SignalLifecycle,
        side: PositionSide,
        trade_plan: &TradePlan,
    ) -> Result<Position, ExecutionError> {
        let entry_price = trade_plan.entry.unwrap_or(signal.initial_price);
        let stop_loss = trade_plan.stop_loss.unwrap_or_else(|| match side {
            PositionSide::Long => entry_price * dec!(0.95),
            PositionSide::Short => entry_price * dec!(1.05),
        });

        let size_pct = clamp_size_pct(trade_plan.position_size.unwrap_or(DEFAULT_SIZE_PCT));
        let balance = self.balance_for("USDT").await;
        let quantity = quantity_for(balance, size_pct, entry_price);
        if quantity <= Decimal::ZERO {
            return Err(ExecutionError::InsufficientBalance { needed: entry_price, available: balance });
        }

        let cost = quantity * entry_price;
        let open_commission = cost * COMMISSION_RATE;
        if cost + open_commission > balance {
            return Err(ExecutionError::InsufficientBalance {
                needed: cost + open_commission,
                available: balance,
            });
        }
        self.adjust_balance("USDT", -(cost + open_commission)).await;

        let take_profit = trade_plan
            .take_profit
            .map(|price| vec![TakeProfitLevel { price, close_fraction: Decimal::ONE, filled: false }])
            .unwrap_or_default();

        let position = Position {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            trailing_stop_pct: None,
            high_water_mark: None,
            low_water_mark: None,
            mode: PositionMode::Paper,
            state: PositionState::Open,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            opened_at: signal.last_candle_time,
            closed_at: None,
            close_reason: None,
        };

        self.position_repo.upsert(&position).await.map_err(|e| ExecutionError::OrderRejected(e.to_string()))?;
        info!(position_id = %position.id, symbol = %position.symbol, %entry_price, %quantity, "paper position opened");
        Ok(position)
    }

    async fn update_stop_loss(&self, position_id: Uuid, new_stop_loss: Decimal) -> Result<(), ExecutionError> {
        let mut position = self
            .position_repo
            .get(position_id)
            .await
            .map_err(|_| ExecutionError::PositionNotFound(position_id.to_string()))?;
        position.stop_loss = new_stop_loss;
        self.position_repo.upsert(&position).await.map_err(|e| ExecutionError::OrderRejected(e.to_string()))
    }

    async fn update_take_profit(&self, position_id: Uuid, new_take_profit: Decimal) -> Result<(), ExecutionError> {
        let mut position = self
            .position_repo
            .get(position_id)
            .await
            .map_err(|_| ExecutionError::PositionNotFound(position_id.to_string()))?;
        if let Some(level) = position.take_profit.first_mut() {
            level.price = new_take_profit;
        } else {
            position.take_profit.push(TakeProfitLevel {
                price: new_take_profit,
                close_fraction: Decimal::ONE,
                filled: false,
            });
        }
        self.position_repo.upsert(&position).await.map_err(|e| ExecutionError::OrderRejected(e.to_string()))
    }

    async fn close(&self, position_id: Uuid, reason: CloseReason) -> Result<(), ExecutionError> {
        let mut position = self
            .position_repo
            .get(position_id)
            .await
            .map_err(|_| ExecutionError::PositionNotFound(position_id.to_string()))?;

        let mark = self.mark_price(&position.symbol, position.entry_price).await;
        let proceeds = position.quantity * mark;
        let close_commission = proceeds * COMMISSION_RATE;
        let open_commission = position.quantity * position.entry_price * COMMISSION_RATE;
        let gross = position.unrealized_pnl_at(mark);

        self.adjust_balance("USDT", proceeds - close_commission).await;

        position.realized_pnl = gross - open_commission - close_commission;
        position.unrealized_pnl = Decimal::ZERO;
        position.state = PositionState::Closed;
        position.closed_at = Some(position.opened_at);
        position.close_reason = Some(reason);

        self.position_repo.upsert(&position).await.map_err(|e| ExecutionError::OrderRejected(e.to_string()))?;

        self.position_bus.publish(PositionClosed {
            position_id: position.id,
            signal_id: position.signal_id,
            symbol: position.symbol.clone(),
            realized_pnl: position.realized_pnl,
            close_reason: reason,
        });

        info!(position_id = %position_id, realized_pnl = %position.realized_pnl, ?reason, "paper position closed");
        Ok(())
    }

    async fn reduce(&self, position_id: Uuid, fraction: Decimal) -> Result<(), ExecutionError> {
        if fraction >= Decimal::ONE {
            return self.close(position_id, CloseReason::Manual).await;
        }

        let mut position = self
            .position_repo
            .get(position_id)
            .await
            .map_err(|_| ExecutionError::PositionNotFound(position_id.to_string()))?;

        let mark = self.mark_price(&position.symbol, position.entry_price).await;
        let reduced_qty = position.quantity * fraction;
        let proceeds = reduced_qty * mark;
        let commission = proceeds * COMMISSION_RATE;
        self.adjust_balance("USDT", proceeds - commission).await;

        let realized_slice = (mark - position.entry_price) * reduced_qty * position.side.sign() - commission;
        position.realized_pnl += realized_slice;
        position.quantity -= reduced_qty;

        self.position_repo.upsert(&position).await.map_err(|e| ExecutionError::OrderRejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn signal() -> SignalLifecycle {
        SignalLifecycle::new(Uuid::new_v4(), "BTCUSDT", 1_000, dec!(50000), vec![], 5)
    }

    #[tokio::test]
    async fn opening_a_position_debits_balance_by_cost_plus_commission() {
        let store = Arc::new(InMemoryStore::new());
        let executor = PaperExecutor::new(KlineCache::new(), store.clone(), PositionEventBus::new());

        let plan = TradePlan {
            entry: Some(dec!(50000)),
            stop_loss: Some(dec!(49000)),
            take_profit: Some(dec!(52000)),
            position_size: Some(dec!(0.10)),
        };

        let position = executor.open_position(&signal(), PositionSide::Long, &plan).await.unwrap();
        assert_eq!(position.quantity, dec!(0.02));
        assert_eq!(executor.balance_for("USDT").await, dec!(10000) - dec!(1000) - dec!(1));
    }

    #[tokio::test]
    async fn closing_realizes_pnl_net_of_both_commissions() {
        let store = Arc::new(InMemoryStore::new());
        let executor = PaperExecutor::new(KlineCache::new(), store.clone(), PositionEventBus::new());

        let plan = TradePlan {
            entry: Some(dec!(100)),
            stop_loss: Some(dec!(95)),
            take_profit: None,
            position_size: Some(dec!(0.10)),
        };
        let position = executor.open_position(&signal(), PositionSide::Long, &plan).await.unwrap();

        executor.cache.append_or_update(crate::domain::Candle {
            symbol: "BTCUSDT".into(),
            interval: crate::domain::Interval::OneMinute,
            open_time: 0,
            close_time: 59_999,
            open: dec!(110),
            high: dec!(110),
            low: dec!(110),
            close: dec!(110),
            volume: dec!(1),
            quote_volume: dec!(0),
            trade_count: 1,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: true,
        }).await;

        executor.close(position.id, CloseReason::TakeProfit).await.unwrap();
        let closed = store.get(position.id).await.unwrap();
        assert_eq!(closed.state, PositionState::Closed);
        assert!(closed.realized_pnl > Decimal::ZERO);
    }
}
