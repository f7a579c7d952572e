use crate::domain::Candle;
use crate::indicators::trend::dec_to_f64;
use std::collections::HashMap;

pub fn highest_high(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    candles[candles.len() - period..]
        .iter()
        .map(|c| dec_to_f64(c.high))
        .reduce(f64::max)
}

pub fn lowest_low(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    candles[candles.len() - period..]
        .iter()
        .map(|c| dec_to_f64(c.low))
        .reduce(f64::min)
}

/// Percent change between the last close and the close `period` bars ago.
pub fn percent_change(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let current = dec_to_f64(candles.last().unwrap().close);
    let past = dec_to_f64(candles[candles.len() - 1 - period].close);
    if past == 0.0 {
        return None;
    }
    Some((current - past) / past * 100.0)
}

/// High-volume-node buckets: total traded volume grouped by price rounded
/// to `bucket_size`, approximating a coarse volume profile.
pub fn hvn_buckets(candles: &[Candle], bucket_size: f64) -> Option<HashMap<i64, f64>> {
    if candles.is_empty() || bucket_size <= 0.0 {
        return None;
    }
    let mut buckets: HashMap<i64, f64> = HashMap::new();
    for c in candles {
        let typical = (dec_to_f64(c.high) + dec_to_f64(c.low) + dec_to_f64(c.close)) / 3.0;
        let key = (typical / bucket_size).round() as i64;
        *buckets.entry(key).or_insert(0.0) += dec_to_f64(c.volume);
    }
    Some(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use rust_decimal_macros::dec;

    fn candle(h: f64, l: f64, c: f64, v: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneMinute,
            open_time: 0,
            close_time: 0,
            open: dec!(0),
            high: rust_decimal::Decimal::try_from(h).unwrap(),
            low: rust_decimal::Decimal::try_from(l).unwrap(),
            close: rust_decimal::Decimal::try_from(c).unwrap(),
            volume: rust_decimal::Decimal::try_from(v).unwrap(),
            quote_volume: dec!(0),
            trade_count: 0,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: true,
        }
    }

    #[test]
    fn highest_high_and_lowest_low_bound_the_window() {
        let candles = vec![candle(105.0, 95.0, 100.0, 1.0), candle(110.0, 90.0, 101.0, 1.0)];
        assert_eq!(highest_high(&candles, 2), Some(110.0));
        assert_eq!(lowest_low(&candles, 2), Some(90.0));
    }

    #[test]
    fn hvn_buckets_groups_by_rounded_price() {
        let candles = vec![candle(101.0, 99.0, 100.0, 5.0), candle(101.2, 99.2, 100.2, 3.0)];
        let buckets = hvn_buckets(&candles, 1.0).unwrap();
        assert_eq!(buckets.values().sum::<f64>(), 8.0);
    }
}
