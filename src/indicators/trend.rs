use crate::domain::Candle;
use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

/// Simple moving average over the last `period` closes, via `ta`. `None`
/// ("not ready") when fewer than `period` candles are available.
pub fn sma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut indicator = SimpleMovingAverage::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(dec_to_f64(c.close));
    }
    Some(value)
}

/// Exponential moving average via `ta`, replayed over the full supplied
/// window from its first candle.
pub fn ema(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut indicator = ExponentialMovingAverage::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(dec_to_f64(c.close));
    }
    Some(value)
}

/// Linearly-weighted moving average: the most recent close carries weight
/// `period`, the oldest in the window weight `1`.
pub fn wma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let denom = (period * (period + 1) / 2) as f64;
    let weighted: f64 = window
        .iter()
        .enumerate()
        .map(|(i, c)| dec_to_f64(c.close) * (i + 1) as f64)
        .sum();
    Some(weighted / denom)
}

/// Volume-weighted average price over the full supplied window.
pub fn vwap(candles: &[Candle]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }
    let mut pv = 0.0;
    let mut v = 0.0;
    for c in candles {
        let typical = (dec_to_f64(c.high) + dec_to_f64(c.low) + dec_to_f64(c.close)) / 3.0;
        let vol = dec_to_f64(c.volume);
        pv += typical * vol;
        v += vol;
    }
    if v == 0.0 {
        return None;
    }
    Some(pv / v)
}

pub(crate) fn dec_to_f64(d: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

/// Builds the `ta::DataItem` the OHLCV-shaped `ta` indicators (ATR, CCI,
/// Williams %R, stochastics, Keltner Channel) take as input.
pub(crate) fn to_data_item(c: &Candle) -> Option<ta::DataItem> {
    ta::DataItem::builder()
        .open(dec_to_f64(c.open))
        .high(dec_to_f64(c.high))
        .low(dec_to_f64(c.low))
        .close(dec_to_f64(c.close))
        .volume(dec_to_f64(c.volume))
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use rust_decimal_macros::dec;

    fn candle_at(close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneMinute,
            open_time: 0,
            close_time: 0,
            open: dec!(0),
            high: rust_decimal::Decimal::try_from(close + 1.0).unwrap(),
            low: rust_decimal::Decimal::try_from(close - 1.0).unwrap(),
            close: rust_decimal::Decimal::try_from(close).unwrap(),
            volume: dec!(10),
            quote_volume: dec!(0),
            trade_count: 0,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: true,
        }
    }

    fn series(values: &[f64]) -> Vec<Candle> {
        values.iter().map(|v| candle_at(*v)).collect()
    }

    #[test]
    fn sma_not_ready_below_period() {
        assert_eq!(sma(&series(&[1.0, 2.0]), 3), None);
    }

    #[test]
    fn sma_averages_trailing_window() {
        let candles = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(sma(&candles, 3), Some(4.0));
    }

    #[test]
    fn ema_reacts_faster_than_sma_to_a_jump() {
        let mut values = vec![10.0; 20];
        values.push(50.0);
        let candles = series(&values);
        let ema_val = ema(&candles, 10).unwrap();
        let sma_val = sma(&candles, 10).unwrap();
        assert!(ema_val > sma_val);
    }

    #[test]
    fn wma_weights_recent_closes_more() {
        let candles = series(&[1.0, 1.0, 10.0]);
        let value = wma(&candles, 3).unwrap();
        assert!(value > sma(&candles, 3).unwrap());
    }

    #[test]
    fn vwap_is_none_for_empty_input() {
        assert_eq!(vwap(&[]), None);
    }
}
