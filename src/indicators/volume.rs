use crate::domain::Candle;
use crate::indicators::trend::dec_to_f64;

/// On-Balance Volume: running sum of signed volume, `+` on an up close,
/// `-` on a down close.
pub fn obv(candles: &[Candle]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }
    let mut value = 0.0;
    for w in candles.windows(2) {
        let delta = dec_to_f64(w[1].close) - dec_to_f64(w[0].close);
        if delta > 0.0 {
            value += dec_to_f64(w[1].volume);
        } else if delta < 0.0 {
            value -= dec_to_f64(w[1].volume);
        }
    }
    Some(value)
}

/// Simple moving average of volume over `period` bars.
pub fn volume_ma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    Some(window.iter().map(|c| dec_to_f64(c.volume)).sum::<f64>() / period as f64)
}

/// Percent change in volume versus the bar `period` steps back.
pub fn volume_change(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let current = dec_to_f64(candles.last().unwrap().volume);
    let past = dec_to_f64(candles[candles.len() - 1 - period].volume);
    if past == 0.0 {
        return None;
    }
    Some((current - past) / past * 100.0)
}

/// Net taker-buy vs taker-sell base volume for the most recent candle;
/// positive when aggressive buyers dominated the bar.
pub fn taker_delta(candles: &[Candle]) -> Option<f64> {
    candles.last().map(|c| dec_to_f64(c.volume_delta()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use rust_decimal_macros::dec;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneMinute,
            open_time: 0,
            close_time: 0,
            open: dec!(0),
            high: dec!(0),
            low: dec!(0),
            close: rust_decimal::Decimal::try_from(close).unwrap(),
            volume: rust_decimal::Decimal::try_from(volume).unwrap(),
            quote_volume: dec!(0),
            trade_count: 0,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: true,
        }
    }

    #[test]
    fn obv_accumulates_signed_volume() {
        let candles = vec![candle(100.0, 10.0), candle(101.0, 5.0), candle(99.0, 3.0)];
        assert_eq!(obv(&candles), Some(2.0));
    }

    #[test]
    fn volume_ma_not_ready_below_period() {
        assert_eq!(volume_ma(&[candle(1.0, 1.0)], 5), None);
    }
}
