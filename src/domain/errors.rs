use thiserror::Error;

/// Transport and protocol failures on the exchange market-data connection.
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("invalid frame: {0}")]
    InvalidData(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
}

/// Failures from compiling or evaluating a strategy's filter source.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("strategy {strategy_id} failed to compile: {source}")]
    Compile { strategy_id: String, source: String },
    #[error("strategy {strategy_id} evaluation exceeded {limit_ms}ms")]
    Timeout { strategy_id: String, limit_ms: u64 },
    #[error("strategy {strategy_id} raised during evaluation: {source}")]
    Runtime { strategy_id: String, source: String },
}

/// Illegal operations against the signal state machine or its decision
/// budget, surfaced to the scheduler and lifecycle manager.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("illegal transition for signal {signal_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        signal_id: String,
        from: crate::domain::signal::SignalState,
        to: crate::domain::signal::SignalState,
    },
    #[error("signal {signal_id} has exhausted its decision budget")]
    BudgetExhausted { signal_id: String },
    #[error("decision oracle unavailable: {0}")]
    OracleUnavailable(String),
    #[error("decision oracle response could not be parsed: {0}")]
    OracleParse(String),
}

/// Trade-execution failures, paper or live.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance {
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },
    #[error("order rejected by exchange: {0}")]
    OrderRejected(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("position {0} not found")]
    PositionNotFound(String),
}

/// Failures from the persistence gateway. The engine degrades to an
/// in-memory fallback rather than propagate these to the hot path; they are
/// still typed so callers can log and switch store.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("optimistic concurrency conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_data_error_messages_are_descriptive() {
        let err = MarketDataError::ConnectionLost("socket reset".into());
        assert!(err.to_string().contains("socket reset"));
    }

    #[test]
    fn execution_error_insufficient_balance_shows_both_amounts() {
        let err = ExecutionError::InsufficientBalance {
            needed: rust_decimal::Decimal::new(100, 0),
            available: rust_decimal::Decimal::new(50, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }
}
