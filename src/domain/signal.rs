use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    New,
    Monitoring,
    Ready,
    PositionOpen,
    Closed,
    Expired,
}

/// One row per strategy match; the unit the lifecycle manager (C6)
/// advances through the state machine in §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalLifecycle {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub symbol: String,
    pub created_at: i64,
    pub initial_price: Decimal,
    pub matched_conditions: Vec<String>,
    pub state: SignalState,
    pub decision_count: u32,
    pub decision_budget: u32,
    pub last_candle_time: i64,
    pub consecutive_errors: u32,
    pub open_position_id: Option<Uuid>,
}

impl SignalLifecycle {
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

    pub fn new(
        strategy_id: Uuid,
        symbol: impl Into<String>,
        created_at: i64,
        initial_price: Decimal,
        matched_conditions: Vec<String>,
        decision_budget: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id,
            symbol: symbol.into(),
            created_at,
            initial_price,
            matched_conditions,
            state: SignalState::New,
            decision_count: 0,
            decision_budget,
            last_candle_time: 0,
            consecutive_errors: 0,
            open_position_id: None,
        }
    }

    /// Validates `from -> to` against the §4.6 machine without mutating
    /// state; callers use this before attempting a persisted transition.
    pub fn can_transition(from: SignalState, to: SignalState) -> bool {
        use SignalState::*;
        matches!(
            (from, to),
            (New, Monitoring)
                | (Monitoring, Ready)
                | (Monitoring, Monitoring)
                | (Monitoring, Expired)
                | (Ready, PositionOpen)
                | (PositionOpen, Closed)
        )
    }

    /// Drops a candle-close event whose `open_time` does not advance the
    /// signal's decision anchor.
    pub fn accepts_candle(&self, open_time: i64) -> bool {
        open_time > self.last_candle_time
    }

    pub fn record_decision(&mut self, candle_open_time: i64) {
        debug_assert!(candle_open_time > self.last_candle_time);
        self.last_candle_time = candle_open_time;
        self.decision_count += 1;
    }

    pub fn budget_exhausted(&self) -> bool {
        self.decision_count >= self.decision_budget
    }

    pub fn record_error(&mut self) -> bool {
        self.consecutive_errors += 1;
        self.consecutive_errors >= Self::MAX_CONSECUTIVE_ERRORS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal() -> SignalLifecycle {
        SignalLifecycle::new(Uuid::new_v4(), "BTCUSDT", 1_000, dec!(50000), vec!["sma20".into()], 5)
    }

    #[test]
    fn legal_transitions_follow_the_machine() {
        use SignalState::*;
        assert!(SignalLifecycle::can_transition(New, Monitoring));
        assert!(SignalLifecycle::can_transition(Monitoring, Ready));
        assert!(SignalLifecycle::can_transition(Ready, PositionOpen));
        assert!(SignalLifecycle::can_transition(PositionOpen, Closed));
        assert!(!SignalLifecycle::can_transition(PositionOpen, Ready));
        assert!(!SignalLifecycle::can_transition(New, PositionOpen));
    }

    #[test]
    fn stale_candle_is_rejected() {
        let mut s = signal();
        s.record_decision(2_000);
        assert!(!s.accepts_candle(2_000));
        assert!(!s.accepts_candle(1_500));
        assert!(s.accepts_candle(2_500));
    }

    #[test]
    fn budget_tracks_decision_count() {
        let mut s = signal();
        for t in (1..=5).map(|i| 1_000 + i * 60_000) {
            assert!(!s.budget_exhausted());
            s.record_decision(t);
        }
        assert!(s.budget_exhausted());
    }
}
