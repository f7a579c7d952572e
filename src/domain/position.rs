use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// `+1` for long, `-1` for short; multiplies directly into PnL math.
    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => -Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    AiClose,
    Flip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub price: Decimal,
    pub close_fraction: Decimal,
    pub filled: bool,
}

/// One row per executed trade. The trade executor (C7) is the sole
/// mutator; the position monitor (C8) holds a read-only view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Vec<TakeProfitLevel>,
    pub trailing_stop_pct: Option<Decimal>,
    pub high_water_mark: Option<Decimal>,
    pub low_water_mark: Option<Decimal>,
    pub mode: PositionMode,
    pub state: PositionState,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    pub fn unrealized_pnl_at(&self, mark_price: Decimal) -> Decimal {
        (mark_price - self.entry_price) * self.quantity * self.side.sign()
    }

    pub fn triggers_stop_loss(&self, mark_price: Decimal) -> bool {
        match self.side {
            PositionSide::Long => mark_price <= self.stop_loss,
            PositionSide::Short => mark_price >= self.stop_loss,
        }
    }

    /// The first unfilled take-profit level the mark price has crossed, if
    /// any.
    pub fn crossed_take_profit(&self, mark_price: Decimal) -> Option<usize> {
        self.take_profit.iter().position(|level| {
            !level.filled
                && match self.side {
                    PositionSide::Long => mark_price >= level.price,
                    PositionSide::Short => mark_price <= level.price,
                }
        })
    }

    /// Re-anchors the trailing stop if `mark_price` has improved by more
    /// than `trailing_pct` since the last water mark; returns `true` if the
    /// stop loss moved.
    pub fn update_trailing_stop(&mut self, mark_price: Decimal) -> bool {
        let Some(trailing_pct) = self.trailing_stop_pct else {
            return false;
        };

        match self.side {
            PositionSide::Long => {
                let unset = self.high_water_mark.is_none();
                let watermark = self.high_water_mark.unwrap_or(self.entry_price);
                if unset || mark_price > watermark {
                    self.high_water_mark = Some(mark_price);
                    let candidate = mark_price * (Decimal::ONE - trailing_pct);
                    if unset || candidate > self.stop_loss {
                        self.stop_loss = candidate;
                        return true;
                    }
                }
            }
            PositionSide::Short => {
                let unset = self.low_water_mark.is_none();
                let watermark = self.low_water_mark.unwrap_or(self.entry_price);
                if unset || mark_price < watermark {
                    self.low_water_mark = Some(mark_price);
                    let candidate = mark_price * (Decimal::ONE + trailing_pct);
                    if unset || candidate < self.stop_loss {
                        self.stop_loss = candidate;
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            entry_price: dec!(100),
            quantity: dec!(1),
            stop_loss: dec!(95),
            take_profit: vec![TakeProfitLevel {
                price: dec!(120),
                close_fraction: dec!(1),
                filled: false,
            }],
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

    #[test]
    fn stop_loss_fires_on_sequence_from_spec_scenario_5() {
        let pos = long_position();
        for (price, expected) in [
            (dec!(101), false),
            (dec!(99), false),
            (dec!(96), false),
            (dec!(94), true),
            (dec!(93), true),
        ] {
            assert_eq!(pos.triggers_stop_loss(price), expected, "price={price}");
        }
    }

    #[test]
    fn trailing_stop_matches_spec_scenario_6() {
        let mut pos = long_position();
        pos.trailing_stop_pct = Some(dec!(0.02));

        pos.update_trailing_stop(dec!(100));
        assert_eq!(pos.stop_loss, dec!(98.00));

        pos.update_trailing_stop(dec!(102));
        assert_eq!(pos.stop_loss, dec!(99.96));

        pos.update_trailing_stop(dec!(105));
        assert_eq!(pos.stop_loss, dec!(102.90));

        pos.update_trailing_stop(dec!(103.9));
        assert_eq!(pos.stop_loss, dec!(102.90));

        assert!(!pos.triggers_stop_loss(dec!(103.9)));
        assert!(pos.triggers_stop_loss(dec!(102.8)));
    }

    #[test]
    fn unrealized_pnl_accounts_for_side() {
        let pos = long_position();
        assert_eq!(pos.unrealized_pnl_at(dec!(110)), dec!(10));

        let mut short = long_position();
        short.side = PositionSide::Short;
        assert_eq!(short.unrealized_pnl_at(dec!(90)), dec!(10));
    }
}
