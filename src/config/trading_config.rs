//! Trade executor (C7) configuration parsed from the environment.

use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Paper,
    Live,
}

impl FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(ExecutionMode::Paper),
            "live" => Ok(ExecutionMode::Live),
            other => bail!("invalid EXECUTION_MODE: {other}, must be 'paper' or 'live'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradingEnvConfig {
    pub mode: ExecutionMode,
    pub starting_balance: rust_decimal::Decimal,
    pub default_size_pct: rust_decimal::Decimal,
    pub rest_rate_limit_per_sec: usize,
}

impl Default for TradingEnvConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            starting_balance: rust_decimal_macros::dec!(10000),
            default_size_pct: rust_decimal_macros::dec!(0.02),
            rest_rate_limit_per_sec: 10,
        }
    }
}

impl TradingEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mode = match env::var("EXECUTION_MODE") {
            Ok(v) => ExecutionMode::from_str(&v)?,
            Err(_) => defaults.mode,
        };

        let starting_balance = env::var("STARTING_BALANCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.starting_balance);

        let default_size_pct = env::var("DEFAULT_SIZE_PCT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_size_pct);

        let rest_rate_limit_per_sec = env::var("EXCHANGE_REST_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rest_rate_limit_per_sec);

        Ok(Self { mode, starting_balance, default_size_pct, rest_rate_limit_per_sec })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_execution_mode() {
        assert!(ExecutionMode::from_str("yolo").is_err());
    }

    #[test]
    fn defaults_to_paper_mode() {
        assert_eq!(TradingEnvConfig::default().mode, ExecutionMode::Paper);
    }
}
