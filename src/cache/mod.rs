use crate::domain::{Candle, Interval};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Default)]
struct Series {
    candles: Vec<Candle>,
    capacity: usize,
}

impl Series {
    fn push(&mut self, candle: Candle) {
        match self.candles.last_mut() {
            Some(last) if last.open_time == candle.open_time => {
                *last = candle;
            }
            _ => {
                self.candles.push(candle);
                if self.candles.len() > self.capacity {
                    self.candles.remove(0);
                }
            }
        }
    }
}

/// Per-`(symbol, interval)` ring buffer of the last *N* closed candles
/// (C2). Single-writer-per-key (the market-data aggregator), many
/// concurrent readers; a per-key lock keeps one symbol's write traffic
/// from blocking reads of another.
#[derive(Clone)]
pub struct KlineCache {
    capacity: usize,
    series: Arc<RwLock<HashMap<(String, Interval), Arc<RwLock<Series>>>>>,
}

impl KlineCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            series: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn series_for(&self, symbol: &str, interval: Interval) -> Arc<RwLock<Series>> {
        let key = (symbol.to_string(), interval);
        if let Some(existing) = self.series.read().await.get(&key) {
            return Arc::clone(existing);
        }
        let mut write_guard = self.series.write().await;
        Arc::clone(
            write_guard
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(RwLock::new(Series {
                        candles: Vec::new(),
                        capacity: self.capacity,
                    }))
                }),
        )
    }

    /// Bootstrap load: replaces the held series outright, truncated to the
    /// last `N`.
    pub async fn bulk_set(&self, symbol: &str, interval: Interval, mut candles: Vec<Candle>) {
        if candles.len() > self.capacity {
            candles.drain(0..candles.len() - self.capacity);
        }
        let series = self.series_for(symbol, interval).await;
        let mut guard = series.write().await;
        guard.candles = candles;
        guard.capacity = self.capacity;
    }

    /// Replaces the last candle if `open_time` matches, otherwise appends
    /// and evicts the oldest entry once over capacity.
    pub async fn append_or_update(&self, candle: Candle) {
        let series = self.series_for(&candle.symbol, candle.interval).await;
        series.write().await.push(candle);
    }

    /// A consistent snapshot of the most recent `limit` candles (or all if
    /// fewer are held).
    pub async fn get_latest(&self, symbol: &str, interval: Interval, limit: usize) -> Vec<Candle> {
        let key = (symbol.to_string(), interval);
        let Some(series) = self.series.read().await.get(&key).cloned() else {
            return Vec::new();
        };
        let guard = series.read().await;
        let start = guard.candles.len().saturating_sub(limit);
        guard.candles[start..].to_vec()
    }

    pub async fn last_close_time(&self, symbol: &str, interval: Interval) -> Option<i64> {
        let key = (symbol.to_string(), interval);
        let series = self.series.read().await.get(&key).cloned()?;
        let guard = series.read().await;
        guard.candles.last().map(|c| c.close_time)
    }
}

impl Default for KlineCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(symbol: &str, open_time: i64, close: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            interval: Interval::OneMinute,
            open_time,
            close_time: open_time + 59_999,
            open: dec!(0),
            high: dec!(0),
            low: dec!(0),
            close: rust_decimal::Decimal::try_from(close).unwrap(),
            volume: dec!(1),
            quote_volume: dec!(0),
            trade_count: 1,
            taker_buy_base_volume: dec!(0),
            taker_buy_quote_volume: dec!(0),
            is_closed: true,
        }
    }

    #[tokio::test]
    async fn append_replaces_same_open_time() {
        let cache = KlineCache::with_capacity(10);
        cache.append_or_update(candle("BTCUSDT", 0, 100.0)).await;
        cache.append_or_update(candle("BTCUSDT", 0, 101.0)).await;
        let latest = cache.get_latest("BTCUSDT", Interval::OneMinute, 10).await;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].close, dec!(101.0));
    }

    #[tokio::test]
    async fn append_evicts_oldest_beyond_capacity() {
        let cache = KlineCache::with_capacity(3);
        for i in 0..5 {
            cache.append_or_update(candle("BTCUSDT", i * 60_000, i as f64)).await;
        }
        let latest = cache.get_latest("BTCUSDT", Interval::OneMinute, 10).await;
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].open_time, 2 * 60_000);
    }

    #[tokio::test]
    async fn get_latest_caps_at_requested_limit() {
        let cache = KlineCache::with_capacity(10);
        for i in 0..5 {
            cache.append_or_update(candle("BTCUSDT", i * 60_000, i as f64)).await;
        }
        let latest = cache.get_latest("BTCUSDT", Interval::OneMinute, 2).await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.last().unwrap().open_time, 4 * 60_000);
    }

    #[tokio::test]
    async fn bulk_set_truncates_to_capacity() {
        let cache = KlineCache::with_capacity(2);
        let candles = (0..5).map(|i| candle("ETHUSDT", i * 60_000, i as f64)).collect();
        cache.bulk_set("ETHUSDT", Interval::OneMinute, candles).await;
        let latest = cache.get_latest("ETHUSDT", Interval::OneMinute, 10).await;
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn last_close_time_reflects_most_recent_candle() {
        let cache = KlineCache::with_capacity(10);
        assert_eq!(cache.last_close_time("BTCUSDT", Interval::OneMinute).await, None);
        cache.append_or_update(candle("BTCUSDT", 0, 100.0)).await;
        assert_eq!(
            cache.last_close_time("BTCUSDT", Interval::OneMinute).await,
            Some(59_999)
        );
    }
}
