//! In-memory fallback store. Used when the SQLite pool is unreachable so
//! the hot path (scheduler, lifecycle manager, executor) never blocks on a
//! write; ids it mints are prefixed `local-` so a later reconciliation pass
//! can tell which rows never made it to the system of record.

use crate::domain::errors::PersistenceError;
use crate::domain::{Decision, Position, SignalLifecycle, SignalState, Strategy};
use crate::persistence::{DecisionRepository, PositionRepository, SignalRepository, StrategyRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    signals: Mutex<HashMap<Uuid, SignalLifecycle>>,
    signal_idempotency: Mutex<HashMap<(Uuid, String, i64), Uuid>>,
    positions: Mutex<HashMap<Uuid, Position>>,
    decisions: Mutex<HashMap<Uuid, Vec<Decision>>>,
    strategies: Mutex<HashMap<Uuid, Strategy>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_strategies(&self, strategies: Vec<Strategy>) {
        let mut guard = self.strategies.lock().expect("strategies mutex poisoned");
        for s in strategies {
            guard.insert(s.id, s);
        }
    }
}

#[async_trait]
impl SignalRepository for InMemoryStore {
    async fn insert_if_absent(
        &self,
        signal: &SignalLifecycle,
        candle_time: i64,
    ) -> Result<bool, PersistenceError> {
        let key = (signal.strategy_id, signal.symbol.clone(), candle_time);
        let mut idempotency = self.signal_idempotency.lock().expect("idempotency mutex poisoned");
        if idempotency.contains_key(&key) {
            return Ok(false);
        }
        idempotency.insert(key, signal.id);
        self.signals
            .lock()
            .expect("signals mutex poisoned")
            .insert(signal.id, signal.clone());
        Ok(true)
    }

    async fn advance_state(
        &self,
        signal_id: Uuid,
        expected_current: SignalState,
        new_state: SignalState,
    ) -> Result<(), PersistenceError> {
        let mut guard = self.signals.lock().expect("signals mutex poisoned");
        let signal = guard.get_mut(&signal_id).ok_or(PersistenceError::NotFound {
            entity: "signal",
            id: signal_id.to_string(),
        })?;
        if signal.state != expected_current {
            return Err(PersistenceError::Conflict {
                entity: "signal",
                id: signal_id.to_string(),
            });
        }
        signal.state = new_state;
        Ok(())
    }

    async fn get(&self, signal_id: Uuid) -> Result<SignalLifecycle, PersistenceError> {
        self.signals
            .lock()
            .expect("signals mutex poisoned")
            .get(&signal_id)
            .cloned()
            .ok_or(PersistenceError::NotFound {
                entity: "signal",
                id: signal_id.to_string(),
            })
    }

    async fn update(&self, signal: &SignalLifecycle) -> Result<(), PersistenceError> {
        self.signals
            .lock()
            .expect("signals mutex poisoned")
            .insert(signal.id, signal.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SignalLifecycle>, PersistenceError> {
        Ok(self
            .signals
            .lock()
            .expect("signals mutex poisoned")
            .values()
            .filter(|s| !matches!(s.state, SignalState::Closed | SignalState::Expired))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PositionRepository for InMemoryStore {
    async fn upsert(&self, position: &Position) -> Result<(), PersistenceError> {
        self.positions
            .lock()
            .expect("positions mutex poisoned")
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn get(&self, position_id: Uuid) -> Result<Position, PersistenceError> {
        self.positions
            .lock()
            .expect("positions mutex poisoned")
            .get(&position_id)
            .cloned()
            .ok_or(PersistenceError::NotFound {
                entity: "position",
                id: position_id.to_string(),
            })
    }

    async fn list_open(&self) -> Result<Vec<Position>, PersistenceError> {
        use crate::domain::PositionState;
        Ok(self
            .positions
            .lock()
            .expect("positions mutex poisoned")
            .values()
            .filter(|p| p.state == PositionState::Open)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DecisionRepository for InMemoryStore {
    async fn append(&self, decision: &Decision) -> Result<(), PersistenceError> {
        self.decisions
            .lock()
            .expect("decisions mutex poisoned")
            .entry(decision.signal_id)
            .or_default()
            .push(decision.clone());
        Ok(())
    }

    async fn list_for_signal(&self, signal_id: Uuid) -> Result<Vec<Decision>, PersistenceError> {
        Ok(self
            .decisions
            .lock()
            .expect("decisions mutex poisoned")
            .get(&signal_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl StrategyRepository for InMemoryStore {
    async fn list_enabled(&self) -> Result<Vec<Strategy>, PersistenceError> {
        Ok(self
            .strategies
            .lock()
            .expect("strategies mutex poisoned")
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn update(&self, strategy: &Strategy) -> Result<(), PersistenceError> {
        self.strategies
            .lock()
            .expect("strategies mutex poisoned")
            .insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn get(&self, strategy_id: Uuid) -> Result<Strategy, PersistenceError> {
        self.strategies
            .lock()
            .expect("strategies mutex poisoned")
            .get(&strategy_id)
            .cloned()
            .ok_or(PersistenceError::NotFound {
                entity: "strategy",
                id: strategy_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal() -> SignalLifecycle {
        SignalLifecycle::new(Uuid::new_v4(), "BTCUSDT", 1_000, dec!(50000), vec!["sma20".into()], 5)
    }

    #[tokio::test]
    async fn insert_if_absent_is_idempotent_per_candle() {
        let store = InMemoryStore::new();
        let s = signal();
        assert!(store.insert_if_absent(&s, 1_000).await.unwrap());
        assert!(!store.insert_if_absent(&s, 1_000).await.unwrap());
    }

    #[tokio::test]
    async fn advance_state_rejects_stale_expected_state() {
        let store = InMemoryStore::new();
        let s = signal();
        store.insert_if_absent(&s, 1_000).await.unwrap();

        store
            .advance_state(s.id, SignalState::New, SignalState::Monitoring)
            .await
            .unwrap();

        let err = store
            .advance_state(s.id, SignalState::New, SignalState::Monitoring)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict { .. }));
    }
}
