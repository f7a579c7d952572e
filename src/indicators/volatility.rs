use crate::domain::Candle;
use crate::indicators::trend::{dec_to_f64, to_data_item};
use ta::indicators::{AverageTrueRange, BollingerBands as TaBollingerBands, KeltnerChannel as TaKeltnerChannel};
use ta::Next;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger Bands via `ta`: an SMA middle band with upper/lower bands
/// `std_dev_mult` standard deviations away.
pub fn bollinger_bands(candles: &[Candle], period: usize, std_dev_mult: f64) -> Option<BollingerBands> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut indicator = TaBollingerBands::new(period, std_dev_mult).ok()?;
    let mut output = indicator.next(dec_to_f64(candles[0].close));
    for c in &candles[1..] {
        output = indicator.next(dec_to_f64(c.close));
    }
    Some(BollingerBands {
        upper: output.upper,
        middle: output.average,
        lower: output.lower,
    })
}

/// Average True Range via `ta`, Wilder-smoothed over `period` bars.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let mut indicator = AverageTrueRange::new(period).ok()?;
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(&to_data_item(c)?);
    }
    Some(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeltnerChannel {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Keltner Channel via `ta`: an EMA midline offset by `multiplier` times
/// ATR, both over the same `period`.
pub fn keltner_channel(candles: &[Candle], period: usize, multiplier: f64) -> Option<KeltnerChannel> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut indicator = TaKeltnerChannel::new(period, multiplier).ok()?;
    let mut output = indicator.next(&to_data_item(&candles[0])?);
    for c in &candles[1..] {
        output = indicator.next(&to_data_item(c)?);
    }
    Some(KeltnerChannel {
        upper: output.upper,
        middle: output.average,
        lower: output.lower,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
    pub middle: f64,
}

/// Donchian Channel: highest high / lowest low over `period` bars.
pub fn donchian_channel(candles: &[Candle], period: usize) -> Option<DonchianChannel> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let upper = window.iter().map(|c| dec_to_f64(c.high)).fold(f64::MIN, f64::max);
    let lower = window.iter().map(|c| dec_to_f64(c.low)).fold(f64::MAX, f64::min);
    Some(DonchianChannel {
        upper,
        lower,
        middle: (upper + lower) / 2.0,
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
    fn bollinger_middle_equals_sma() {
        let candles: Vec<_> = (1..=20).map(|i| candle(i as f64 + 1.0, i as f64 - 1.0, i as f64)).collect();
        let bands = bollinger_bands(&candles, 20, 2.0).unwrap();
        assert!(bands.upper > bands.middle);
        assert!(bands.lower < bands.middle);
    }

    #[test]
    fn atr_is_not_ready_below_period() {
        let candles: Vec<_> = (0..5).map(|i| candle(i as f64 + 1.0, i as f64 - 1.0, i as f64)).collect();
        assert_eq!(atr(&candles, 14), None);
    }

    #[test]
    fn donchian_bounds_contain_every_close() {
        let candles: Vec<_> = vec![candle(105.0, 95.0, 100.0), candle(110.0, 90.0, 101.0), candle(108.0, 92.0, 99.0)];
        let channel = donchian_channel(&candles, 3).unwrap();
        assert_eq!(channel.upper, 110.0);
        assert_eq!(channel.lower, 90.0);
    }
}
