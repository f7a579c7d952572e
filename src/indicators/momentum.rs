use crate::domain::Candle;
use crate::indicators::trend::{dec_to_f64, to_data_item};
use ta::indicators::{
    CommodityChannelIndex, FastStochastic, MovingAverageConvergenceDivergence, RateOfChange,
    RelativeStrengthIndex, WilliamsR,
};
use ta::Next;

/// Wilder's RSI via `ta`. Needs `period + 1` closes to compute the first
/// average gain/loss; anything shorter is "not ready".
pub fn rsi(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let mut indicator = RelativeStrengthIndex::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(dec_to_f64(c.close));
    }
    Some(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

/// Standard 12/26/9 MACD via `ta`, parameterised. Requires enough candles
/// to warm up the slow EMA plus the signal smoothing.
pub fn macd(candles: &[Candle], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if slow == 0 || candles.len() < slow + signal {
        return None;
    }
    let mut indicator = MovingAverageConvergenceDivergence::new(fast, slow, signal).ok()?;
    let mut output = indicator.next(dec_to_f64(candles[0].close));
    for c in &candles[1..] {
        output = indicator.next(dec_to_f64(c.close));
    }
    Some(Macd {
        macd_line: output.macd,
        signal_line: output.signal,
        histogram: output.histogram,
    })
}

/// Stochastic oscillator `%K` over `period` bars, via `ta`.
pub fn stochastic(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut indicator = FastStochastic::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(&to_data_item(c)?);
    }
    Some(value)
}

/// Stochastic RSI: the stochastic formula applied to the RSI series rather
/// than price.
pub fn stoch_rsi(candles: &[Candle], rsi_period: usize, stoch_period: usize) -> Option<f64> {
    if candles.len() < rsi_period + stoch_period {
        return None;
    }
    let mut rsi_series = Vec::with_capacity(candles.len());
    for end in (rsi_period + 1)..=candles.len() {
        rsi_series.push(rsi(&candles[..end], rsi_period)?);
    }
    if rsi_series.len() < stoch_period {
        return None;
    }
    let window = &rsi_series[rsi_series.len() - stoch_period..];
    let highest = window.iter().cloned().fold(f64::MIN, f64::max);
    let lowest = window.iter().cloned().fold(f64::MAX, f64::min);
    let current = *window.last().unwrap();
    if (highest - lowest).abs() < f64::EPSILON {
        return Some(50.0);
    }
    Some((current - lowest) / (highest - lowest) * 100.0)
}

/// Commodity Channel Index over `period` bars, via `ta`.
pub fn cci(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut indicator = CommodityChannelIndex::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(&to_data_item(c)?);
    }
    Some(value)
}

/// Williams %R over `period` bars via `ta`; negative scale, 0 (overbought)
/// to -100 (oversold).
pub fn williams_r(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut indicator = WilliamsR::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(&to_data_item(c)?);
    }
    Some(value)
}

/// Rate of change via `ta`: percent difference between the current close
/// and the close `period` bars back.
pub fn roc(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let mut indicator = RateOfChange::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(dec_to_f64(c.close));
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use rust_decimal_macros::dec;

    fn candle(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneMinute,
            open_time: 0,
            close_time: 0,
            open: rust_decimal::Decimal::try_from(o).unwrap(),
            high: rust_decimal::Decimal::try_from(h).unwrap(),
            low: rust_decimal::Decimal::try_from(l).unwrap(),
            close: rust_decimal::Decimal::try_from(c).unwrap(),
            volume: dec!(10),
            quote_volume: dec!(0),
            trade_count: 0,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: true,
        }
    }

    fn rising_series(n: usize) -> Vec<Candle> {
        (0..n).map(|i| {
            let c = 100.0 + i as f64;
            candle(c - 0.5, c + 1.0, c - 1.0, c)
        }).collect()
    }

    #[test]
    fn rsi_not_ready_below_period_plus_one() {
        assert_eq!(rsi(&rising_series(5), 14), None);
    }

    #[test]
    fn rsi_is_100_for_strictly_rising_series() {
        let value = rsi(&rising_series(20), 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn roc_reports_percent_change() {
        let candles = rising_series(11);
        let value = roc(&candles, 10).unwrap();
        assert!(value > 0.0);
    }

    #[test]
    fn stochastic_is_100_at_window_high() {
        let candles = rising_series(14);
        let value = stochastic(&candles, 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }
}
