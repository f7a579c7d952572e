use crate::cache::KlineCache;
use crate::domain::events::CandleClose;
use crate::domain::Interval;
use crate::infrastructure::event_bus::CandleCloseBus;
use crate::market_data::websocket::KlineStreamClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

/// Maintains the single multiplexed kline WebSocket, the authoritative
/// kline cache (C2) and the deduplicated candle-close bus (C3).
pub struct MarketDataAggregator {
    client: KlineStreamClient,
    cache: KlineCache,
    bus: CandleCloseBus,
    last_emitted_close_time: Arc<Mutex<HashMap<(String, Interval), i64>>>,
    candles_processed: Arc<std::sync::atomic::AtomicU64>,
}

impl MarketDataAggregator {
    pub fn new(ws_url: impl Into<String>, cache: KlineCache, bus: CandleCloseBus) -> Self {
        Self {
            client: KlineStreamClient::new(ws_url),
            cache,
            bus,
            last_emitted_close_time: Arc::new(Mutex::new(HashMap::new())),
            candles_processed: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub fn candles_processed(&self) -> u64 {
        self.candles_processed.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Runs the aggregator until `shutdown` fires. Spawns a heartbeat task
    /// alongside the stream reader (every 30s, per §5's periodic
    /// maintenance note).
    pub async fn run(&self, symbols: Vec<String>, intervals: Vec<Interval>, shutdown: watch::Receiver<bool>) {
        let mut heartbeat_shutdown = shutdown.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        info!("market-data aggregator heartbeat");
                    }
                    _ = heartbeat_shutdown.changed() => {
                        if *heartbeat_shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        let cache = self.cache.clone();
        let bus = self.bus.clone();
        let dedupe = Arc::clone(&self.last_emitted_close_time);
        let counter = Arc::clone(&self.candles_processed);

        self.client
            .run(
                &symbols,
                &intervals,
                move |frame| {
                    let candle = frame.candle;
                    let key = (candle.symbol.clone(), candle.interval);

                    let already_emitted = {
                        let mut guard = dedupe.lock().expect("dedupe mutex poisoned");
                        match guard.get(&key) {
                            Some(last) if *last >= candle.close_time => true,
                            _ => {
                                guard.insert(key, candle.close_time);
                                false
                            }
                        }
                    };
                    if already_emitted {
                        return;
                    }

                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                    let cache = cache.clone();
                    let bus = bus.clone();
                    let candle_for_cache = candle.clone();
                    tokio::spawn(async move {
                        cache.append_or_update(candle_for_cache).await;
                        let symbol = candle.symbol.clone();
                        let interval = candle.interval;
                        let close_time = candle.close_time;
                        let delivered = bus.publish(CandleClose {
                            symbol: symbol.clone(),
                            interval,
                            candle,
                            close_time,
                        });
                        if delivered == 0 {
                            warn!(symbol, ?interval, "candle-close event had no subscribers");
                        }
                    });
                },
                shutdown,
            )
            .await;

        heartbeat.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedupe_map_starts_empty_and_is_keyed_per_symbol_interval() {
        let aggregator = MarketDataAggregator::new(
            "wss://example.invalid",
            KlineCache::new(),
            CandleCloseBus::new(),
        );
        assert_eq!(aggregator.candles_processed(), 0);
        assert!(aggregator.last_emitted_close_time.lock().unwrap().is_empty());
    }
}
