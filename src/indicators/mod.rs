//! Pure functions over candle vectors. Every function is deterministic and
//! allocation-bounded; all return `Option` rather than propagate a partial
//! or NaN answer when the input window is shorter than the required
//! warm-up — callers treat `None` as "not ready".
//!
//! Indicators `ta` covers (SMA, EMA, RSI, MACD, Bollinger Bands, ATR,
//! stochastics, CCI, Williams %R, ROC, Keltner Channel) are replayed
//! through its streaming `Next` implementations; the rest (VWAP, WMA, OBV,
//! ADX, Aroon, Donchian Channel, Stochastic RSI) are hand-rolled here.

pub mod momentum;
pub mod price_action;
pub mod trend;
pub mod trend_strength;
pub mod volatility;
pub mod volume;

use crate::domain::Candle;
use std::collections::HashMap;

/// The snapshot of computed indicators handed to the AI oracle (§6 request
/// body) and exposed read-only inside the strategy sandbox (§4.4).
#[derive(Debug, Clone, Default)]
pub struct ComputedIndicators {
    pub values: HashMap<String, f64>,
}

impl ComputedIndicators {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }
}

/// Computes the standard indicator set used for oracle payloads and
/// sandbox context. Strategies needing something outside this set call the
/// individual functions directly through the sandbox bindings instead.
pub fn compute_standard_set(candles: &[Candle]) -> ComputedIndicators {
    let mut values = HashMap::new();

    if let Some(v) = trend::sma(candles, 20) {
        values.insert("sma_20".into(), v);
    }
    if let Some(v) = trend::ema(candles, 20) {
        values.insert("ema_20".into(), v);
    }
    if let Some(v) = momentum::rsi(candles, 14) {
        values.insert("rsi_14".into(), v);
    }
    if let Some(m) = momentum::macd(candles, 12, 26, 9) {
        values.insert("macd_line".into(), m.macd_line);
        values.insert("macd_signal".into(), m.signal_line);
        values.insert("macd_histogram".into(), m.histogram);
    }
    if let Some(b) = volatility::bollinger_bands(candles, 20, 2.0) {
        values.insert("bb_upper".into(), b.upper);
        values.insert("bb_middle".into(), b.middle);
        values.insert("bb_lower".into(), b.lower);
    }
    if let Some(v) = volatility::atr(candles, 14) {
        values.insert("atr_14".into(), v);
    }
    if let Some(v) = trend_strength::adx(candles, 14) {
        values.insert("adx_14".into(), v);
    }
    if let Some(v) = volume::obv(candles) {
        values.insert("obv".into(), v);
    }

    ComputedIndicators { values }
}
