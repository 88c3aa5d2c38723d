//! Outbound events for the WebSocket broadcaster
//!
//! The fan-out hub itself is an external collaborator; the core only
//! publishes onto a broadcast channel. Prices and quantities are
//! serialized as fixed-point strings, never floats.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// One price level as the wire sees it.
#[derive(Debug, Clone, Serialize)]
pub struct LevelMsg {
    pub price: String,
    pub quantity: String,
}

/// Events emitted by the core for downstream broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    Trade {
        symbol: String,
        price: String,
        quantity: String,
        side: String,
        created_at: DateTime<Utc>,
    },
    OrderBook {
        symbol: String,
        bids: Vec<LevelMsg>,
        asks: Vec<LevelMsg>,
    },
    Ticker {
        symbol: String,
        last_price: String,
        change_24h: String,
        high_24h: String,
        low_24h: String,
        volume_24h: String,
    },
}

/// Broadcast handle shared by settlement, the market maker and the market
/// service. Publishing never blocks and never fails the publisher: with no
/// subscribers the event is simply dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExchangeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ExchangeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn publish_trade(
        &self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        side: crate::models::Side,
        created_at: DateTime<Utc>,
    ) {
        self.publish(ExchangeEvent::Trade {
            symbol: symbol.to_string(),
            price: price.to_string(),
            quantity: quantity.to_string(),
            side: side.as_str().to_string(),
            created_at,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish_trade("BTC/USDT", dec!(100), dec!(1), Side::Buy, Utc::now());
    }

    #[tokio::test]
    async fn test_subscriber_receives_trade() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish_trade("BTC/USDT", dec!(100.5), dec!(0.25), Side::Sell, Utc::now());

        match rx.recv().await.unwrap() {
            ExchangeEvent::Trade { price, quantity, side, .. } => {
                assert_eq!(price, "100.5");
                assert_eq!(quantity, "0.25");
                assert_eq!(side, "sell");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_trade_event_serializes_decimals_as_strings() {
        let event = ExchangeEvent::Trade {
            symbol: "BTC/USDT".into(),
            price: dec!(42000.12).to_string(),
            quantity: dec!(0.005).to_string(),
            side: "buy".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["price"], "42000.12");
        assert_eq!(json["quantity"], "0.005");
    }
}
