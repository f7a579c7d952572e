//! Sandboxed strategy runtime (C4). Compiles each strategy's
//! `filter_source` once into a cached `rhai::AST` and evaluates it with
//! access to nothing but the indicator library (C1), the symbol's ticker,
//! and its recent candle history. The `rhai` engine has no built-in
//! filesystem, network, environment, or clock bindings; we additionally
//! strip its few always-sandboxed-by-default escape hatches (`eval`) and
//! bound every call to a wall-clock deadline via `on_progress`.

use crate::domain::candle::{Candle, Interval, Ticker};
use crate::domain::errors::SandboxError;
use crate::indicators::{momentum, trend, trend_strength, volatility, volume as vol};
use rhai::{Array, Dynamic, Engine, Scope, AST};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_EVAL_BUDGET: Duration = Duration::from_millis(100);

/// A compiled strategy handle, keyed by strategy id + source hash for
/// cache invalidation when `filter_source` changes.
#[derive(Clone)]
pub struct CompiledFilter {
    ast: Arc<AST>,
}

/// The data a filter evaluation is allowed to see: the ticker for the
/// symbol under test and its required-interval candle windows, each
/// already sliced to `bar_history_limit`.
pub struct EvaluationContext<'a> {
    pub ticker: &'a Ticker,
    pub candles: &'a HashMap<Interval, Vec<Candle>>,
}

/// Compiles and runs sandboxed strategy filters (C4).
pub struct StrategyRuntime {
    engine: Engine,
    cache: Mutex<HashMap<String, CompiledFilter>>,
    eval_budget: Duration,
}

fn candle_to_script(c: &Candle) -> ScriptCandle {
    ScriptCandle {
        open: to_f64(c.open),
        high: to_f64(c.high),
        low: to_f64(c.low),
        close: to_f64(c.close),
        volume: to_f64(c.volume),
    }
}

fn to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

fn script_window_to_candles(window: &[ScriptCandle]) -> Vec<Candle> {
    window
        .iter()
        .map(|sc| Candle {
            symbol: String::new(),
            interval: Interval::OneMinute,
            open_time: 0,
            close_time: 0,
            open: Decimal::from_f64_retain(sc.open).unwrap_or_default(),
            high: Decimal::from_f64_retain(sc.high).unwrap_or_default(),
            low: Decimal::from_f64_retain(sc.low).unwrap_or_default(),
            close: Decimal::from_f64_retain(sc.close).unwrap_or_default(),
            volume: Decimal::from_f64_retain(sc.volume).unwrap_or_default(),
            quote_volume: Decimal::ZERO,
            trade_count: 0,
            taker_buy_base_volume: Decimal::ZERO,
            taker_buy_quote_volume: Decimal::ZERO,
            is_closed: true,
        })
        .collect()
}

/// A minimal, copyable OHLCV view a script can index and pass to indicator
/// functions. Deliberately carries no symbol/timestamp metadata.
#[derive(Debug, Clone, Copy)]
pub struct ScriptCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

fn array_to_window(arr: &Array) -> Vec<ScriptCandle> {
    arr.iter()
        .filter_map(|d| d.clone().try_cast::<ScriptCandle>())
        .collect()
}

/// Not-ready sentinel exposed to scripts: indicator functions return NaN
/// rather than a partial answer, and the script checks `ready(x)` before
/// using the value.
const NOT_READY: f64 = f64::NAN;

impl StrategyRuntime {
    pub fn new() -> Self {
        Self::with_eval_budget(DEFAULT_EVAL_BUDGET)
    }

    pub fn with_eval_budget(eval_budget: Duration) -> Self {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(32, 32);
        engine.set_max_operations(200_000);
        engine.set_max_array_size(10_000);
        engine.set_max_string_size(10_000);
        engine.disable_symbol("eval");

        engine
            .register_type_with_name::<ScriptCandle>("Candle")
            .register_get("open", |c: &mut ScriptCandle| c.open)
            .register_get("high", |c: &mut ScriptCandle| c.high)
            .register_get("low", |c: &mut ScriptCandle| c.low)
            .register_get("close", |c: &mut ScriptCandle| c.close)
            .register_get("volume", |c: &mut ScriptCandle| c.volume);

        engine.register_fn("ready", |x: f64| !x.is_nan());

        engine.register_fn("sma", |window: Array, period: i64| -> f64 {
            let candles = script_window_to_candles(&array_to_window(&window));
            trend::sma(&candles, period.max(0) as usize).unwrap_or(NOT_READY)
        });
        engine.register_fn("ema", |window: Array, period: i64| -> f64 {
            let candles = script_window_to_candles(&array_to_window(&window));
            trend::ema(&candles, period.max(0) as usize).unwrap_or(NOT_READY)
        });
        engine.register_fn("rsi", |window: Array, period: i64| -> f64 {
            let candles = script_window_to_candles(&array_to_window(&window));
            momentum::rsi(&candles, period.max(0) as usize).unwrap_or(NOT_READY)
        });
        engine.register_fn("macd_histogram", |window: Array, fast: i64, slow: i64, signal: i64| -> f64 {
            let candles = script_window_to_candles(&array_to_window(&window));
            momentum::macd(&candles, fast.max(0) as usize, slow.max(0) as usize, signal.max(0) as usize)
                .map(|m| m.histogram)
                .unwrap_or(NOT_READY)
        });
        engine.register_fn("atr", |window: Array, period: i64| -> f64 {
            let candles = script_window_to_candles(&array_to_window(&window));
            volatility::atr(&candles, period.max(0) as usize).unwrap_or(NOT_READY)
        });
        engine.register_fn("adx", |window: Array, period: i64| -> f64 {
            let candles = script_window_to_candles(&array_to_window(&window));
            trend_strength::adx(&candles, period.max(0) as usize).unwrap_or(NOT_READY)
        });
        engine.register_fn("obv", |window: Array| -> f64 {
            let candles = script_window_to_candles(&array_to_window(&window));
            vol::obv(&candles).unwrap_or(NOT_READY)
        });

        Self {
            engine,
            cache: Mutex::new(HashMap::new()),
            eval_budget,
        }
    }

    /// Compiles `filter_source`, or returns the cached handle if the
    /// source is unchanged for this strategy id.
    pub fn compile(&self, strategy_id: &str, filter_source: &str) -> Result<CompiledFilter, SandboxError> {
        let cache_key = format!("{strategy_id}:{:x}", source_hash(filter_source));
        if let Some(cached) = self.cache.lock().expect("sandbox cache poisoned").get(&cache_key) {
            return Ok(cached.clone());
        }

        let ast = self
            .engine
            .compile(filter_source)
            .map_err(|e| SandboxError::Compile {
                strategy_id: strategy_id.to_string(),
                source: e.to_string(),
            })?;

        let compiled = CompiledFilter { ast: Arc::new(ast) };
        self.cache
            .lock()
            .expect("sandbox cache poisoned")
            .insert(cache_key, compiled.clone());
        Ok(compiled)
    }

    /// Runs a compiled filter against `ctx`, enforcing the wall-clock
    /// budget. Any thrown error or deadline exceedance becomes `Ok(false)`
    /// from the scheduler's point of view; callers decide how to count
    /// that against `consecutive_errors` using the `Err` variant here.
    pub fn run(&self, strategy_id: &str, filter: &CompiledFilter, ctx: &EvaluationContext<'_>) -> Result<bool, SandboxError> {
        let mut scope = Scope::new();
        scope.push("price", ctx.ticker.last_price.to_string().parse::<f64>().unwrap_or(0.0));
        scope.push(
            "change_pct_24h",
            ctx.ticker.price_change_percent_24h.to_string().parse::<f64>().unwrap_or(0.0),
        );
        scope.push("volume_24h", ctx.ticker.volume_24h.to_string().parse::<f64>().unwrap_or(0.0));

        for (interval, candles) in ctx.candles {
            let array: Array = candles.iter().map(|c| Dynamic::from(candle_to_script(c))).collect();
            scope.push(format!("candles_{}", interval.as_binance_code()), array);
        }

        let start = Instant::now();
        let budget = self.eval_budget;
        let mut engine = self.engine.clone();
        engine.on_progress(move |_| if start.elapsed() > budget { Some(Dynamic::UNIT) } else { None });

        let result: Result<bool, _> = engine.eval_ast_with_scope(&mut scope, &filter.ast);

        result.map_err(|e| {
            if start.elapsed() > self.eval_budget {
                SandboxError::Timeout {
                    strategy_id: strategy_id.to_string(),
                    limit_ms: self.eval_budget.as_millis() as u64,
                }
            } else {
                SandboxError::Runtime {
                    strategy_id: strategy_id.to_string(),
                    source: e.to_string(),
                }
            }
        })
    }
}

impl Default for StrategyRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn source_hash(source: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker() -> Ticker {
        Ticker {
            symbol: "BTCUSDT".into(),
            last_price: dec!(50100),
            price_change_percent_24h: dec!(1.5),
            volume_24h: dec!(1000),
        }
    }

    fn rising_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                symbol: "BTCUSDT".into(),
                interval: Interval::OneMinute,
                open_time: i as i64 * 60_000,
                close_time: i as i64 * 60_000 + 59_999,
                open: Decimal::from_f64_retain(100.0 + i as f64).unwrap(),
                high: Decimal::from_f64_retain(101.0 + i as f64).unwrap(),
                low: Decimal::from_f64_retain(99.0 + i as f64).unwrap(),
                close: Decimal::from_f64_retain(100.0 + i as f64).unwrap(),
                volume: dec!(10),
                quote_volume: dec!(0),
                trade_count: 1,
                taker_buy_base_volume: dec!(0),
                taker_buy_quote_volume: dec!(0),
                is_closed: true,
            })
            .collect()
    }

    #[test]
    fn compiles_and_matches_a_simple_price_above_sma_filter() {
        let runtime = StrategyRuntime::new();
        let filter = runtime
            .compile("strategy-1", "let avg = sma(candles_1m, 20); ready(avg) && price > avg")
            .unwrap();

        let mut candles = HashMap::new();
        candles.insert(Interval::OneMinute, rising_candles(25));
        let ctx = EvaluationContext { ticker: &ticker(), candles: &candles };

        assert_eq!(runtime.run("strategy-1", &filter, &ctx).unwrap(), true);
    }

    #[test]
    fn not_ready_indicator_short_circuits_via_ready_guard() {
        let runtime = StrategyRuntime::new();
        let filter = runtime
            .compile("strategy-2", "let avg = sma(candles_1m, 50); ready(avg) && price > avg")
            .unwrap();

        let mut candles = HashMap::new();
        candles.insert(Interval::OneMinute, rising_candles(10));
        let ctx = EvaluationContext { ticker: &ticker(), candles: &candles };

        assert_eq!(runtime.run("strategy-2", &filter, &ctx).unwrap(), false);
    }

    #[test]
    fn compile_error_surfaces_as_sandbox_error() {
        let runtime = StrategyRuntime::new();
        let err = runtime.compile("strategy-3", "this is not } valid rhai (((").unwrap_err();
        assert!(matches!(err, SandboxError::Compile { .. }));
    }

    #[test]
    fn repeated_compile_with_same_source_hits_the_cache() {
        let runtime = StrategyRuntime::new();
        let first = runtime.compile("strategy-4", "price > 0").unwrap();
        let second = runtime.compile("strategy-4", "price > 0").unwrap();
        assert!(Arc::ptr_eq(&first.ast, &second.ast));
    }

    #[test]
    fn runaway_loop_is_killed_by_the_operation_cap() {
        let runtime = StrategyRuntime::new();
        let filter = runtime.compile("strategy-5", "let x = 0; loop { x += 1; }").unwrap();
        let candles = HashMap::new();
        let ctx = EvaluationContext { ticker: &ticker(), candles: &candles };
        assert!(runtime.run("strategy-5", &filter, &ctx).is_err());
    }
}
