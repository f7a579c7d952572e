use crate::domain::events::{CandleClose, PositionClosed, SignalCreated};
use tokio::sync::broadcast;

/// Default channel depth before a lagging subscriber starts losing the
/// oldest unread candle-close events (see design note in §9: "drop oldest
/// ... only if the receiver has fallen more than 100 events behind").
const CHANNEL_CAPACITY: usize = 100;

/// Typed, bounded pub/sub bus carrying candle-close events from the
/// market-data aggregator (C3) out to the scheduler (C5), lifecycle
/// manager (C6) and position monitor (C8). Backed by a broadcast channel:
/// once a subscriber falls more than [`CHANNEL_CAPACITY`] events behind,
/// `tokio::sync::broadcast` itself drops the oldest entries for that lagging
/// receiver and the next `recv()` reports how many were skipped, which we
/// surface as a metric rather than block the aggregator.
#[derive(Clone)]
pub struct CandleCloseBus {
    sender: broadcast::Sender<CandleClose>,
}

impl CandleCloseBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CandleClose> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers that received the event;
    /// an error only means there were zero subscribers, which is not a
    /// failure for the aggregator.
    pub fn publish(&self, event: CandleClose) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CandleCloseBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded pub/sub bus carrying signal-created events from the scheduler
/// (C5) out to the lifecycle manager (C6), same backpressure policy as
/// [`CandleCloseBus`].
#[derive(Clone)]
pub struct SignalEventBus {
    sender: broadcast::Sender<SignalCreated>,
}

impl SignalEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalCreated> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SignalCreated) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for SignalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded pub/sub bus carrying position-closed events from the trade
/// executor (C7) out to the lifecycle manager (C6).
#[derive(Clone)]
pub struct PositionEventBus {
    sender: broadcast::Sender<PositionClosed>,
}

impl PositionEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PositionClosed> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PositionClosed) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for PositionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, Interval};
    use rust_decimal_macros::dec;

    fn event() -> CandleClose {
        CandleClose {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneMinute,
            close_time: 59_999,
            candle: Candle {
                symbol: "BTCUSDT".into(),
                interval: Interval::OneMinute,
                open_time: 0,
                close_time: 59_999,
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(1),
                quote_volume: dec!(100),
                trade_count: 1,
                taker_buy_base_volume: dec!(0),
                taker_buy_quote_volume: dec!(0),
                is_closed: true,
            },
        }
    }

    #[tokio::test]
    async fn published_events_reach_all_subscribers() {
        let bus = CandleCloseBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(event());

        assert_eq!(a.recv().await.unwrap().symbol, "BTCUSDT");
        assert_eq!(b.recv().await.unwrap().symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_rather_than_blocking_publisher() {
        let bus = CandleCloseBus::new();
        let mut lagging = bus.subscribe();

        for _ in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(event());
        }

        match lagging.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected Lagged, got {other:?}"),
        }
    }
}
