use crate::domain::candle::Interval;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The language a strategy's `filter_source` is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterLanguage {
    SandboxedScript,
    Native,
}

/// The compiled evaluation unit the scheduler (C5) runs against every
/// symbol in the universe on its `trigger_interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub owner: Option<String>,
    pub enabled: bool,
    pub filter_source: String,
    pub filter_language: FilterLanguage,
    pub required_intervals: Vec<Interval>,
    pub trigger_interval: Interval,
    pub strategy_instructions: String,
    pub decision_budget: u32,
    pub bar_history_limit: usize,
    pub consecutive_errors: u32,
    pub disabled_reason: Option<String>,
}

impl Strategy {
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

    pub fn record_error(&mut self, reason: impl Into<String>) {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= Self::MAX_CONSECUTIVE_ERRORS && self.enabled {
            self.enabled = false;
            self.disabled_reason = Some(reason.into());
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            owner: None,
            enabled: true,
            filter_source: "price > sma(20)".into(),
            filter_language: FilterLanguage::SandboxedScript,
            required_intervals: vec![Interval::OneMinute],
            trigger_interval: Interval::OneMinute,
            strategy_instructions: "buy strength, sell weakness".into(),
            decision_budget: 5,
            bar_history_limit: 200,
            consecutive_errors: 0,
            disabled_reason: None,
        }
    }

    #[test]
    fn auto_disables_at_five_consecutive_errors() {
        let mut s = strategy();
        for _ in 0..4 {
            s.record_error("timeout");
            assert!(s.enabled);
        }
        s.record_error("timeout");
        assert!(!s.enabled);
        assert!(s.disabled_reason.is_some());
    }

    #[test]
    fn success_resets_error_count() {
        let mut s = strategy();
        s.record_error("timeout");
        s.record_error("timeout");
        s.record_success();
        assert_eq!(s.consecutive_errors, 0);
    }
}
