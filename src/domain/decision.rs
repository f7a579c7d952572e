use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionKind {
    Enter,
    Continue,
    Abandon,
    Hold,
    AdjustStopLoss,
    AdjustTakeProfit,
    Reduce,
    Close,
}

impl DecisionKind {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "ENTER" => Some(Self::Enter),
            "CONTINUE" => Some(Self::Continue),
            "ABANDON" => Some(Self::Abandon),
            "HOLD" => Some(Self::Hold),
            "ADJUST_SL" => Some(Self::AdjustStopLoss),
            "ADJUST_TP" => Some(Self::AdjustTakeProfit),
            "REDUCE" => Some(Self::Reduce),
            "CLOSE" => Some(Self::Close),
            _ => None,
        }
    }
}

/// The trade parameters an `enter` (or adjust) decision may carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradePlan {
    pub entry: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub position_size: Option<Decimal>,
}

/// An immutable, append-only verdict the AI oracle produced for a signal
/// at a given candle close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub signal_id: Uuid,
    pub timestamp: i64,
    pub candle_time: i64,
    pub kind: DecisionKind,
    pub confidence: f64,
    pub reasoning: String,
    pub trade_plan: Option<TradePlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_labels_case_insensitively() {
        assert_eq!(DecisionKind::from_label("enter"), Some(DecisionKind::Enter));
        assert_eq!(DecisionKind::from_label("ENTER"), Some(DecisionKind::Enter));
        assert_eq!(DecisionKind::from_label("Adjust_Sl"), Some(DecisionKind::AdjustStopLoss));
        assert_eq!(DecisionKind::from_label("nonsense"), None);
    }
}
