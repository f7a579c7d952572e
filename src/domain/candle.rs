use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kline interval code, e.g. `1m`, `5m`, `1h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl Interval {
    pub fn as_binance_code(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    pub fn as_secs(&self) -> i64 {
        match self {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::OneHour => 3600,
            Interval::FourHours => 14_400,
            Interval::OneDay => 86_400,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_binance_code())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown interval code: {0}")]
pub struct ParseIntervalError(String);

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            other => Err(ParseIntervalError(other.to_string())),
        }
    }
}

/// An immutable OHLCV record. Only candles with `is_closed == true` ever
/// enter the kline cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: Interval,
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trade_count: i64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    pub is_closed: bool,
}

impl Candle {
    /// Volume attributable to aggressive sell orders: total volume minus the
    /// taker-buy share the exchange reports.
    pub fn taker_sell_base_volume(&self) -> Decimal {
        self.volume - self.taker_buy_base_volume
    }

    /// Positive when buy-side volume dominates the bar.
    pub fn volume_delta(&self) -> Decimal {
        self.taker_buy_base_volume - self.taker_sell_base_volume()
    }

    pub fn open_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.open_time).unwrap_or_else(Utc::now)
    }
}

/// Last-price / 24h-change / volume snapshot for the symbol under
/// evaluation, exposed read-only inside the strategy sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_percent_24h: Decimal,
    pub volume_24h: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_interval_codes() {
        assert_eq!("1m".parse::<Interval>().unwrap(), Interval::OneMinute);
        assert_eq!("1h".parse::<Interval>().unwrap(), Interval::OneHour);
        assert!("3m".parse::<Interval>().is_err());
    }

    #[test]
    fn volume_delta_is_positive_when_buy_dominated() {
        let candle = Candle {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneMinute,
            open_time: 0,
            close_time: 59_999,
            open: Decimal::new(100, 0),
            high: Decimal::new(101, 0),
            low: Decimal::new(99, 0),
            close: Decimal::new(100, 0),
            volume: Decimal::new(10, 0),
            quote_volume: Decimal::new(1000, 0),
            trade_count: 42,
            taker_buy_base_volume: Decimal::new(7, 0),
            taker_buy_quote_volume: Decimal::new(700, 0),
            is_closed: true,
        };
        assert_eq!(candle.taker_sell_base_volume(), Decimal::new(3, 0));
        assert_eq!(candle.volume_delta(), Decimal::new(4, 0));
    }
}
