//! Persistence gateway (C9): repository traits plus two implementations —
//! [`sqlite`] (the system of record) and [`memory`] (the hot-path fallback
//! used when the store is unreachable, per §4.9's "never block on a write").

pub mod memory;
pub mod sqlite;

use crate::domain::errors::PersistenceError;
use crate::domain::{Decision, Position, SignalLifecycle, Strategy};
use async_trait::async_trait;
use uuid::Uuid;

/// CRUD plus the idempotency and optimistic-concurrency primitives §4.9
/// requires: `insert_if_absent` is keyed on `(strategy_id, symbol,
/// candle_time)` so a scheduler retry after a crash can't double-create a
/// signal, and `advance_state` fails rather than overwrite a state another
/// writer has already moved past.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn insert_if_absent(
        &self,
        signal: &SignalLifecycle,
        candle_time: i64,
    ) -> Result<bool, PersistenceError>;

    async fn advance_state(
        &self,
        signal_id: Uuid,
        expected_current: crate::domain::SignalState,
        new_state: crate::domain::SignalState,
    ) -> Result<(), PersistenceError>;

    async fn get(&self, signal_id: Uuid) -> Result<SignalLifecycle, PersistenceError>;

    async fn update(&self, signal: &SignalLifecycle) -> Result<(), PersistenceError>;

    async fn list_active(&self) -> Result<Vec<SignalLifecycle>, PersistenceError>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn upsert(&self, position: &Position) -> Result<(), PersistenceError>;

    async fn get(&self, position_id: Uuid) -> Result<Position, PersistenceError>;

    async fn list_open(&self) -> Result<Vec<Position>, PersistenceError>;
}

#[async_trait]
pub trait DecisionRepository: Send + Sync {
    async fn append(&self, decision: &Decision) -> Result<(), PersistenceError>;

    async fn list_for_signal(&self, signal_id: Uuid) -> Result<Vec<Decision>, PersistenceError>;
}

#[async_trait]
pub trait StrategyRepository: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<Strategy>, PersistenceError>;

    async fn update(&self, strategy: &Strategy) -> Result<(), PersistenceError>;

    async fn get(&self, strategy_id: Uuid) -> Result<Strategy, PersistenceError>;
}
