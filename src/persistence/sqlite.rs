use crate::domain::errors::PersistenceError;
use crate::domain::position::{CloseReason, PositionMode, PositionSide, PositionState, TakeProfitLevel};
use crate::domain::signal::SignalState;
use crate::domain::strategy::FilterLanguage;
use crate::domain::{Decision, DecisionKind, Position, SignalLifecycle, Strategy, TradePlan};
use crate::persistence::{DecisionRepository, PositionRepository, SignalRepository, StrategyRepository};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

fn unreachable(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Unreachable(e.to_string())
}

/// The SQLite system of record for signals, positions, decisions and
/// strategies (C9). A single pool backs all four repository traits, mirroring
/// the teacher's one-`Database`-many-repositories split.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_url: &str) -> Result<Self, PersistenceError> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PersistenceError::Unreachable(e.to_string()))?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(unreachable)?;

        info!(db_url, "connected to signal store");

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), PersistenceError> {
        let mut conn = self.pool.acquire().await.map_err(unreachable)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                owner TEXT,
                enabled BOOLEAN NOT NULL,
                filter_source TEXT NOT NULL,
                filter_language TEXT NOT NULL,
                required_intervals TEXT NOT NULL,
                trigger_interval TEXT NOT NULL,
                strategy_instructions TEXT NOT NULL,
                decision_budget INTEGER NOT NULL,
                bar_history_limit INTEGER NOT NULL,
                consecutive_errors INTEGER NOT NULL,
                disabled_reason TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(unreachable)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                initial_price TEXT NOT NULL,
                matched_conditions TEXT NOT NULL,
                state TEXT NOT NULL,
                decision_count INTEGER NOT NULL,
                decision_budget INTEGER NOT NULL,
                last_candle_time INTEGER NOT NULL,
                consecutive_errors INTEGER NOT NULL,
                open_position_id TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(unreachable)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_idempotency (
                strategy_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                candle_time INTEGER NOT NULL,
                signal_id TEXT NOT NULL,
                PRIMARY KEY (strategy_id, symbol, candle_time)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(unreachable)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                trailing_stop_pct TEXT,
                high_water_mark TEXT,
                low_water_mark TEXT,
                mode TEXT NOT NULL,
                state TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER,
                close_reason TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(unreachable)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                signal_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                candle_time INTEGER NOT NULL,
                kind TEXT NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL,
                trade_plan TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(unreachable)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_signal ON decisions (signal_id);")
            .execute(&mut *conn)
            .await
            .map_err(unreachable)?;

        Ok(())
    }
}

fn row_to_signal(row: &sqlx::sqlite::SqliteRow) -> Result<SignalLifecycle, PersistenceError> {
    let state_str: String = row.try_get("state").map_err(unreachable)?;
    let open_position_id: Option<String> = row.try_get("open_position_id").map_err(unreachable)?;
    let matched_conditions_json: String = row.try_get("matched_conditions").map_err(unreachable)?;

    Ok(SignalLifecycle {
        id: Uuid::parse_str(&row.try_get::<String, _>("id").map_err(unreachable)?)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        strategy_id: Uuid::parse_str(&row.try_get::<String, _>("strategy_id").map_err(unreachable)?)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        symbol: row.try_get("symbol").map_err(unreachable)?,
        created_at: row.try_get("created_at").map_err(unreachable)?,
        initial_price: row
            .try_get::<String, _>("initial_price")
            .map_err(unreachable)?
            .parse()
            .map_err(|e: rust_decimal::Error| PersistenceError::Unreachable(e.to_string()))?,
        matched_conditions: serde_json::from_str(&matched_conditions_json)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        state: parse_signal_state(&state_str)?,
        decision_count: row.try_get::<i64, _>("decision_count").map_err(unreachable)? as u32,
        decision_budget: row.try_get::<i64, _>("decision_budget").map_err(unreachable)? as u32,
        last_candle_time: row.try_get("last_candle_time").map_err(unreachable)?,
        consecutive_errors: row.try_get::<i64, _>("consecutive_errors").map_err(unreachable)? as u32,
        open_position_id: open_position_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
    })
}

fn signal_state_str(state: SignalState) -> &'static str {
    match state {
        SignalState::New => "new",
        SignalState::Monitoring => "monitoring",
        SignalState::Ready => "ready",
        SignalState::PositionOpen => "position_open",
        SignalState::Closed => "closed",
        SignalState::Expired => "expired",
    }
}

fn parse_signal_state(s: &str) -> Result<SignalState, PersistenceError> {
    Ok(match s {
        "new" => SignalState::New,
        "monitoring" => SignalState::Monitoring,
        "ready" => SignalState::Ready,
        "position_open" => SignalState::PositionOpen,
        "closed" => SignalState::Closed,
        "expired" => SignalState::Expired,
        other => {
            return Err(PersistenceError::Unreachable(format!("unknown signal state: {other}")));
        }
    })
}

#[async_trait]
impl SignalRepository for SqliteStore {
    async fn insert_if_absent(
        &self,
        signal: &SignalLifecycle,
        candle_time: i64,
    ) -> Result<bool, PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(unreachable)?;

        let existing = sqlx::query(
            "SELECT signal_id FROM signal_idempotency WHERE strategy_id = ? AND symbol = ? AND candle_time = ?",
        )
        .bind(signal.strategy_id.to_string())
        .bind(&signal.symbol)
        .bind(candle_time)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unreachable)?;

        if existing.is_some() {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO signal_idempotency (strategy_id, symbol, candle_time, signal_id) VALUES (?, ?, ?, ?)",
        )
        .bind(signal.strategy_id.to_string())
        .bind(&signal.symbol)
        .bind(candle_time)
        .bind(signal.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(unreachable)?;

        sqlx::query(
            r#"
            INSERT INTO signals (
                id, strategy_id, symbol, created_at, initial_price, matched_conditions,
                state, decision_count, decision_budget, last_candle_time, consecutive_errors, open_position_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(signal.id.to_string())
        .bind(signal.strategy_id.to_string())
        .bind(&signal.symbol)
        .bind(signal.created_at)
        .bind(signal.initial_price.to_string())
        .bind(serde_json::to_string(&signal.matched_conditions).unwrap_or_default())
        .bind(signal_state_str(signal.state))
        .bind(signal.decision_count as i64)
        .bind(signal.decision_budget as i64)
        .bind(signal.last_candle_time)
        .bind(signal.consecutive_errors as i64)
        .bind(signal.open_position_id.map(|id| id.to_string()))
        .execute(&mut *tx)
        .await
        .map_err(unreachable)?;

        tx.commit().await.map_err(unreachable)?;
        Ok(true)
    }

    async fn advance_state(
        &self,
        signal_id: Uuid,
        expected_current: SignalState,
        new_state: SignalState,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query("UPDATE signals SET state = ? WHERE id = ? AND state = ?")
            .bind(signal_state_str(new_state))
            .bind(signal_id.to_string())
            .bind(signal_state_str(expected_current))
            .execute(&self.pool)
            .await
            .map_err(unreachable)?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::Conflict {
                entity: "signal",
                id: signal_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, signal_id: Uuid) -> Result<SignalLifecycle, PersistenceError> {
        let row = sqlx::query("SELECT * FROM signals WHERE id = ?")
            .bind(signal_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unreachable)?
            .ok_or(PersistenceError::NotFound {
                entity: "signal",
                id: signal_id.to_string(),
            })?;
        row_to_signal(&row)
    }

    async fn update(&self, signal: &SignalLifecycle) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            UPDATE signals SET
                state = ?, decision_count = ?, last_candle_time = ?,
                consecutive_errors = ?, open_position_id = ?
            WHERE id = ?
            "#,
        )
        .bind(signal_state_str(signal.state))
        .bind(signal.decision_count as i64)
        .bind(signal.last_candle_time)
        .bind(signal.consecutive_errors as i64)
        .bind(signal.open_position_id.map(|id| id.to_string()))
        .bind(signal.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SignalLifecycle>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM signals WHERE state NOT IN ('closed', 'expired')")
            .fetch_all(&self.pool)
            .await
            .map_err(unreachable)?;
        rows.iter().map(row_to_signal).collect()
    }
}

fn position_side_str(side: PositionSide) -> &'static str {
    match side {
        PositionSide::Long => "long",
        PositionSide::Short => "short",
    }
}

fn position_mode_str(mode: PositionMode) -> &'static str {
    match mode {
        PositionMode::Paper => "paper",
        PositionMode::Live => "live",
    }
}

fn position_state_str(state: PositionState) -> &'static str {
    match state {
        PositionState::Open => "open",
        PositionState::Closed => "closed",
    }
}

fn close_reason_str(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::StopLoss => "stop_loss",
        CloseReason::TakeProfit => "take_profit",
        CloseReason::Manual => "manual",
        CloseReason::AiClose => "ai_close",
        CloseReason::Flip => "flip",
    }
}

fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position, PersistenceError> {
    let side_str: String = row.try_get("side").map_err(unreachable)?;
    let mode_str: String = row.try_get("mode").map_err(unreachable)?;
    let state_str: String = row.try_get("state").map_err(unreachable)?;
    let close_reason_str: Option<String> = row.try_get("close_reason").map_err(unreachable)?;
    let take_profit_json: String = row.try_get("take_profit").map_err(unreachable)?;
    let trailing_stop_pct: Option<String> = row.try_get("trailing_stop_pct").map_err(unreachable)?;
    let high_water_mark: Option<String> = row.try_get("high_water_mark").map_err(unreachable)?;
    let low_water_mark: Option<String> = row.try_get("low_water_mark").map_err(unreachable)?;

    let parse_dec = |s: String| -> Result<rust_decimal::Decimal, PersistenceError> {
        s.parse().map_err(|e: rust_decimal::Error| PersistenceError::Unreachable(e.to_string()))
    };

    Ok(Position {
        id: Uuid::parse_str(&row.try_get::<String, _>("id").map_err(unreachable)?)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        signal_id: Uuid::parse_str(&row.try_get::<String, _>("signal_id").map_err(unreachable)?)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        symbol: row.try_get("symbol").map_err(unreachable)?,
        side: match side_str.as_str() {
            "long" => PositionSide::Long,
            _ => PositionSide::Short,
        },
        entry_price: parse_dec(row.try_get("entry_price").map_err(unreachable)?)?,
        quantity: parse_dec(row.try_get("quantity").map_err(unreachable)?)?,
        stop_loss: parse_dec(row.try_get("stop_loss").map_err(unreachable)?)?,
        take_profit: serde_json::from_str::<Vec<TakeProfitLevel>>(&take_profit_json)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        trailing_stop_pct: trailing_stop_pct.map(parse_dec).transpose()?,
        high_water_mark: high_water_mark.map(parse_dec).transpose()?,
        low_water_mark: low_water_mark.map(parse_dec).transpose()?,
        mode: match mode_str.as_str() {
            "live" => PositionMode::Live,
            _ => PositionMode::Paper,
        },
        state: match state_str.as_str() {
            "closed" => PositionState::Closed,
            _ => PositionState::Open,
        },
        realized_pnl: parse_dec(row.try_get("realized_pnl").map_err(unreachable)?)?,
        unrealized_pnl: parse_dec(row.try_get("unrealized_pnl").map_err(unreachable)?)?,
        opened_at: row.try_get("opened_at").map_err(unreachable)?,
        closed_at: row.try_get("closed_at").map_err(unreachable)?,
        close_reason: close_reason_str.map(|s| match s.as_str() {
            "stop_loss" => CloseReason::StopLoss,
            "take_profit" => CloseReason::TakeProfit,
            "ai_close" => CloseReason::AiClose,
            "flip" => CloseReason::Flip,
            _ => CloseReason::Manual,
        }),
    })
}

#[async_trait]
impl PositionRepository for SqliteStore {
    async fn upsert(&self, position: &Position) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, signal_id, symbol, side, entry_price, quantity, stop_loss, take_profit,
                trailing_stop_pct, high_water_mark, low_water_mark, mode, state,
                realized_pnl, unrealized_pnl, opened_at, closed_at, close_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                trailing_stop_pct = excluded.trailing_stop_pct,
                high_water_mark = excluded.high_water_mark,
                low_water_mark = excluded.low_water_mark,
                state = excluded.state,
                realized_pnl = excluded.realized_pnl,
                unrealized_pnl = excluded.unrealized_pnl,
                closed_at = excluded.closed_at,
                close_reason = excluded.close_reason
            "#,
        )
        .bind(position.id.to_string())
        .bind(position.signal_id.to_string())
        .bind(&position.symbol)
        .bind(position_side_str(position.side))
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(position.stop_loss.to_string())
        .bind(serde_json::to_string(&position.take_profit).unwrap_or_default())
        .bind(position.trailing_stop_pct.map(|d| d.to_string()))
        .bind(position.high_water_mark.map(|d| d.to_string()))
        .bind(position.low_water_mark.map(|d| d.to_string()))
        .bind(position_mode_str(position.mode))
        .bind(position_state_str(position.state))
        .bind(position.realized_pnl.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.opened_at)
        .bind(position.closed_at)
        .bind(position.close_reason.map(close_reason_str))
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;
        Ok(())
    }

    async fn get(&self, position_id: Uuid) -> Result<Position, PersistenceError> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(position_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unreachable)?
            .ok_or(PersistenceError::NotFound {
                entity: "position",
                id: position_id.to_string(),
            })?;
        row_to_position(&row)
    }

    async fn list_open(&self) -> Result<Vec<Position>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE state = 'open'")
            .fetch_all(&self.pool)
            .await
            .map_err(unreachable)?;
        rows.iter().map(row_to_position).collect()
    }
}

fn decision_kind_str(kind: DecisionKind) -> &'static str {
    match kind {
        DecisionKind::Enter => "ENTER",
        DecisionKind::Continue => "CONTINUE",
        DecisionKind::Abandon => "ABANDON",
        DecisionKind::Hold => "HOLD",
        DecisionKind::AdjustStopLoss => "ADJUST_SL",
        DecisionKind::AdjustTakeProfit => "ADJUST_TP",
        DecisionKind::Reduce => "REDUCE",
        DecisionKind::Close => "CLOSE",
    }
}

#[async_trait]
impl DecisionRepository for SqliteStore {
    async fn append(&self, decision: &Decision) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO decisions (signal_id, timestamp, candle_time, kind, confidence, reasoning, trade_plan)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(decision.signal_id.to_string())
        .bind(decision.timestamp)
        .bind(decision.candle_time)
        .bind(decision_kind_str(decision.kind))
        .bind(decision.confidence)
        .bind(&decision.reasoning)
        .bind(decision.trade_plan.as_ref().map(|p| serde_json::to_string(p).unwrap_or_default()))
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;
        Ok(())
    }

    async fn list_for_signal(&self, signal_id: Uuid) -> Result<Vec<Decision>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM decisions WHERE signal_id = ? ORDER BY timestamp ASC")
            .bind(signal_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(unreachable)?;

        rows.iter()
            .map(|row| {
                let kind_str: String = row.try_get("kind").map_err(unreachable)?;
                let trade_plan_json: Option<String> = row.try_get("trade_plan").map_err(unreachable)?;
                Ok(Decision {
                    signal_id,
                    timestamp: row.try_get("timestamp").map_err(unreachable)?,
                    candle_time: row.try_get("candle_time").map_err(unreachable)?,
                    kind: DecisionKind::from_label(&kind_str).ok_or_else(|| {
                        PersistenceError::Unreachable(format!("unknown decision kind: {kind_str}"))
                    })?,
                    confidence: row.try_get("confidence").map_err(unreachable)?,
                    reasoning: row.try_get("reasoning").map_err(unreachable)?,
                    trade_plan: trade_plan_json
                        .map(|j| serde_json::from_str::<TradePlan>(&j))
                        .transpose()
                        .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
                })
            })
            .collect()
    }
}

fn filter_language_str(lang: FilterLanguage) -> &'static str {
    match lang {
        FilterLanguage::SandboxedScript => "sandboxed_script",
        FilterLanguage::Native => "native",
    }
}

#[async_trait]
impl StrategyRepository for SqliteStore {
    async fn list_enabled(&self) -> Result<Vec<Strategy>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM strategies WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(unreachable)?;
        rows.iter().map(row_to_strategy).collect()
    }

    async fn update(&self, strategy: &Strategy) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO strategies (
                id, owner, enabled, filter_source, filter_language, required_intervals,
                trigger_interval, strategy_instructions, decision_budget, bar_history_limit,
                consecutive_errors, disabled_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                enabled = excluded.enabled,
                filter_source = excluded.filter_source,
                required_intervals = excluded.required_intervals,
                trigger_interval = excluded.trigger_interval,
                strategy_instructions = excluded.strategy_instructions,
                decision_budget = excluded.decision_budget,
                bar_history_limit = excluded.bar_history_limit,
                consecutive_errors = excluded.consecutive_errors,
                disabled_reason = excluded.disabled_reason
            "#,
        )
        .bind(strategy.id.to_string())
        .bind(&strategy.owner)
        .bind(strategy.enabled)
        .bind(&strategy.filter_source)
        .bind(filter_language_str(strategy.filter_language))
        .bind(serde_json::to_string(&strategy.required_intervals).unwrap_or_default())
        .bind(strategy.trigger_interval.as_binance_code())
        .bind(&strategy.strategy_instructions)
        .bind(strategy.decision_budget as i64)
        .bind(strategy.bar_history_limit as i64)
        .bind(strategy.consecutive_errors as i64)
        .bind(&strategy.disabled_reason)
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;
        Ok(())
    }

    async fn get(&self, strategy_id: Uuid) -> Result<Strategy, PersistenceError> {
        let row = sqlx::query("SELECT * FROM strategies WHERE id = ?")
            .bind(strategy_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unreachable)?
            .ok_or(PersistenceError::NotFound {
                entity: "strategy",
                id: strategy_id.to_string(),
            })?;
        row_to_strategy(&row)
    }
}

fn row_to_strategy(row: &sqlx::sqlite::SqliteRow) -> Result<Strategy, PersistenceError> {
    use crate::domain::candle::Interval;
    use std::str::FromStr as _;

    let filter_language_str: String = row.try_get("filter_language").map_err(unreachable)?;
    let required_intervals_json: String = row.try_get("required_intervals").map_err(unreachable)?;
    let trigger_interval_str: String = row.try_get("trigger_interval").map_err(unreachable)?;
    let required_intervals_codes: Vec<String> = serde_json::from_str(&required_intervals_json)
        .map_err(|e| PersistenceError::Unreachable(e.to_string()))?;

    Ok(Strategy {
        id: Uuid::parse_str(&row.try_get::<String, _>("id").map_err(unreachable)?)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        owner: row.try_get("owner").map_err(unreachable)?,
        enabled: row.try_get("enabled").map_err(unreachable)?,
        filter_source: row.try_get("filter_source").map_err(unreachable)?,
        filter_language: match filter_language_str.as_str() {
            "native" => FilterLanguage::Native,
            _ => FilterLanguage::SandboxedScript,
        },
        required_intervals: required_intervals_codes
            .iter()
            .map(|s| Interval::from_str(s))
            .collect::<Result<_, _>>()
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        trigger_interval: Interval::from_str(&trigger_interval_str)
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?,
        strategy_instructions: row.try_get("strategy_instructions").map_err(unreachable)?,
        decision_budget: row.try_get::<i64, _>("decision_budget").map_err(unreachable)? as u32,
        bar_history_limit: row.try_get::<i64, _>("bar_history_limit").map_err(unreachable)? as usize,
        consecutive_errors: row.try_get::<i64, _>("consecutive_errors").map_err(unreachable)? as u32,
        disabled_reason: row.try_get("disabled_reason").map_err(unreachable)?,
    })
}
