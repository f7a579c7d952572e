use crate::domain::Candle;
use crate::indicators::trend::dec_to_f64;

/// Average Directional Index, the standard Wilder-smoothed `+DI`/`-DI`
/// construction collapsed to its final value over `period` bars.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period * 2 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    let mut trs = Vec::with_capacity(candles.len() - 1);

    for w in candles.windows(2) {
        let up_move = dec_to_f64(w[1].high) - dec_to_f64(w[0].high);
        let down_move = dec_to_f64(w[0].low) - dec_to_f64(w[1].low);
        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        trs.push(
            (dec_to_f64(w[1].high) - dec_to_f64(w[1].low))
                .max((dec_to_f64(w[1].high) - dec_to_f64(w[0].close)).abs())
                .max((dec_to_f64(w[1].low) - dec_to_f64(w[0].close)).abs()),
        );
    }

    let smooth = |series: &[f64]| -> Vec<f64> {
        let mut out = Vec::with_capacity(series.len() - period + 1);
        let mut acc: f64 = series[..period].iter().sum();
        out.push(acc);
        for v in &series[period..] {
            acc = acc - acc / period as f64 + v;
            out.push(acc);
        }
        out
    };

    let smoothed_tr = smooth(&trs);
    let smoothed_plus = smooth(&plus_dm);
    let smoothed_minus = smooth(&minus_dm);

    let mut dx_series = Vec::with_capacity(smoothed_tr.len());
    for i in 0..smoothed_tr.len() {
        if smoothed_tr[i] == 0.0 {
            dx_series.push(0.0);
            continue;
        }
        let plus_di = 100.0 * smoothed_plus[i] / smoothed_tr[i];
        let minus_di = 100.0 * smoothed_minus[i] / smoothed_tr[i];
        let sum = plus_di + minus_di;
        dx_series.push(if sum == 0.0 { 0.0 } else { 100.0 * (plus_di - minus_di).abs() / sum });
    }

    if dx_series.len() < period {
        return None;
    }
    Some(dx_series[dx_series.len() - period..].iter().sum::<f64>() / period as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aroon {
    pub up: f64,
    pub down: f64,
}

/// Aroon Up/Down: how many bars since the `period`-window high/low.
pub fn aroon(candles: &[Candle], period: usize) -> Option<Aroon> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let window = &candles[candles.len() - (period + 1)..];
    let (high_idx, _) = window
        .iter()
        .enumerate()
        .max_by(|a, b| dec_to_f64(a.1.high).total_cmp(&dec_to_f64(b.1.high)))
        .unwrap();
    let (low_idx, _) = window
        .iter()
        .enumerate()
        .min_by(|a, b| dec_to_f64(a.1.low).total_cmp(&dec_to_f64(b.1.low)))
        .unwrap();

    let bars_since_high = period - high_idx;
    let bars_since_low = period - low_idx;
    Some(Aroon {
        up: (period as f64 - bars_since_high as f64) / period as f64 * 100.0,
        down: (period as f64 - bars_since_low as f64) / period as f64 * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;
    use rust_decimal_macros::dec;

    fn candle(h: f64, l: f64, c: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneMinute,
            open_time: 0,
            close_time: 0,
            open: dec!(0),
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

    #[test]
    fn adx_not_ready_below_twice_period() {
        let candles: Vec<_> = (0..10).map(|i| candle(i as f64 + 1.0, i as f64 - 1.0, i as f64)).collect();
        assert_eq!(adx(&candles, 14), None);
    }

    #[test]
    fn aroon_up_is_100_when_high_is_most_recent_bar() {
        let mut candles: Vec<_> = (0..10).map(|i| candle(100.0 - i as f64, 95.0 - i as f64, 98.0 - i as f64)).collect();
        candles.push(candle(200.0, 150.0, 180.0));
        let a = aroon(&candles, 10).unwrap();
        assert_eq!(a.up, 100.0);
    }
}
