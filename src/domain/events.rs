use crate::domain::candle::{Candle, Interval};
use crate::domain::position::CloseReason;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Published by C3 at most once per `(symbol, interval, close_time)`;
/// consumed by C5 (scheduler), C6 (lifecycle manager) and C8 (position
/// monitor) over the bounded bus described in §9.
#[derive(Debug, Clone)]
pub struct CandleClose {
    pub symbol: String,
    pub interval: Interval,
    pub candle: Candle,
    pub close_time: i64,
}

#[derive(Debug, Clone)]
pub struct SignalCreated {
    pub signal_id: Uuid,
    pub strategy_id: Uuid,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub struct PositionClosed {
    pub position_id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub realized_pnl: Decimal,
    pub close_reason: CloseReason,
}
