use crate::domain::errors::MarketDataError;
use crate::domain::{Candle, Interval};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// A single multiplexed WebSocket subscribing to `kline_{interval}`
/// streams for the cross-product of `(symbols × intervals)` (C3).
/// Reconnects with exponential backoff (1s doubling to a 60s cap) and
/// pings every 30s, as §4.3 specifies.
pub struct KlineStreamClient {
    ws_url: String,
}

/// A single closed- or in-progress-candle update parsed off the wire.
/// Only `is_closed == true` frames are acted upon by the caller.
#[derive(Debug, Clone)]
pub struct KlineFrame {
    pub candle: Candle,
}

impl KlineStreamClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }

    /// Runs forever, invoking `on_frame` for every parsed kline update and
    /// reconnecting on any transport error. Never returns except when the
    /// `shutdown` signal fires.
    pub async fn run<F>(
        &self,
        symbols: &[String],
        intervals: &[Interval],
        mut on_frame: F,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) where
        F: FnMut(KlineFrame) + Send,
    {
        let mut backoff_secs: u64 = 1;
        const MAX_BACKOFF_SECS: u64 = 60;

        loop {
            if *shutdown.borrow() {
                return;
            }

            tokio::select! {
                result = self.connect_and_stream(symbols, intervals, &mut on_frame, &mut shutdown) => {
                    match result {
                        Ok(()) => {
                            info!("kline stream closed cleanly, resetting backoff");
                            backoff_secs = 1;
                        }
                        Err(e) => {
                            error!(error = %e, backoff_secs, "kline stream error, reconnecting");
                            tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn connect_and_stream<F>(
        &self,
        symbols: &[String],
        intervals: &[Interval],
        on_frame: &mut F,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), MarketDataError>
    where
        F: FnMut(KlineFrame) + Send,
    {
        if symbols.is_empty() || intervals.is_empty() {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            return Ok(());
        }

        let streams: Vec<String> = symbols
            .iter()
            .flat_map(|s| {
                intervals
                    .iter()
                    .map(move |i| format!("{}@kline_{}", s.to_lowercase(), i.as_binance_code()))
            })
            .collect();

        let url = format!(
            "{}/stream?streams={}",
            self.ws_url.trim_end_matches('/'),
            streams.join("/")
        );

        info!(stream_count = streams.len(), "connecting to kline stream");
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| MarketDataError::ConnectionLost(e.to_string()))?;
        info!("kline stream connected");

        let (mut write, mut read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(100);

        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let ping_tx = ws_tx.clone();
        let pinger = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                if ping_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match Self::parse_kline_envelope(&text) {
                                Ok(Some(frame)) => on_frame(frame),
                                Ok(None) => {}
                                Err(e) => warn!(error = %e, "dropping unparseable kline frame"),
                            }
                        }
                        Some(Ok(Message::Ping(_))) => {
                            let _ = ws_tx.send(Message::Pong(Vec::new().into())).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("pong received");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "kline stream closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            writer.abort();
                            pinger.abort();
                            return Err(MarketDataError::ConnectionLost(e.to_string()));
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        writer.abort();
                        pinger.abort();
                        return Ok(());
                    }
                }
            }
        }

        writer.abort();
        pinger.abort();
        Ok(())
    }

    fn parse_kline_envelope(text: &str) -> Result<Option<KlineFrame>, MarketDataError> {
        #[derive(Deserialize)]
        struct Envelope {
            data: Option<EventData>,
        }
        #[derive(Deserialize)]
        struct EventData {
            s: String,
            k: RawKline,
        }
        #[derive(Deserialize)]
        struct RawKline {
            t: i64,
            #[serde(rename = "T")]
            close_time: i64,
            i: String,
            o: String,
            h: String,
            l: String,
            c: String,
            v: String,
            n: i64,
            x: bool,
            q: String,
            #[serde(rename = "V")]
            taker_buy_base: String,
            #[serde(rename = "Q")]
            taker_buy_quote: String,
        }

        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| MarketDataError::InvalidData(e.to_string()))?;
        let Some(data) = envelope.data else {
            return Ok(None);
        };

        if !data.k.x {
            return Ok(None);
        }

        let interval = Interval::from_str(&data.k.i)
            .map_err(|e| MarketDataError::InvalidData(e.to_string()))?;

        let parse_dec = |s: &str| -> Result<Decimal, MarketDataError> {
            Decimal::from_str(s).map_err(|e| MarketDataError::InvalidData(e.to_string()))
        };

        let candle = Candle {
            symbol: data.s,
            interval,
            open_time: data.k.t,
            close_time: data.k.close_time,
            open: parse_dec(&data.k.o)?,
            high: parse_dec(&data.k.h)?,
            low: parse_dec(&data.k.l)?,
            close: parse_dec(&data.k.c)?,
            volume: parse_dec(&data.k.v)?,
            quote_volume: parse_dec(&data.k.q)?,
            trade_count: data.k.n,
            taker_buy_base_volume: parse_dec(&data.k.taker_buy_base)?,
            taker_buy_quote_volume: parse_dec(&data.k.taker_buy_quote)?,
            is_closed: true,
        };

        Ok(Some(KlineFrame { candle }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_candles_are_ignored() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","s":"BTCUSDT","k":{"t":0,"T":59999,"s":"BTCUSDT","i":"1m","o":"1","h":"2","l":"0.5","c":"1.5","v":"10","n":5,"x":false,"q":"15","V":"5","Q":"7.5"}}}"#;
        assert!(KlineStreamClient::parse_kline_envelope(text).unwrap().is_none());
    }

    #[test]
    fn closed_candles_parse_into_a_candle() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","s":"BTCUSDT","k":{"t":0,"T":59999,"s":"BTCUSDT","i":"1m","o":"1","h":"2","l":"0.5","c":"1.5","v":"10","n":5,"x":true,"q":"15","V":"5","Q":"7.5"}}}"#;
        let frame = KlineStreamClient::parse_kline_envelope(text).unwrap().unwrap();
        assert_eq!(frame.candle.symbol, "BTCUSDT");
        assert!(frame.candle.is_closed);
        assert_eq!(frame.candle.close_time, 59999);
    }

    #[test]
    fn subscription_acks_with_no_data_are_skipped() {
        let text = r#"{"result":null,"id":1}"#;
        assert!(KlineStreamClient::parse_kline_envelope(text).unwrap().is_none());
    }
}
