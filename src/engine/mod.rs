//! Matching engines: one per symbol, lazily created, sharing one trade
//! channel into settlement
//!
//! Submit and cancel take the symbol's lock exclusively; the snapshot
//! clones the aggregated view under the same lock. Trade emission happens
//! while the lock is held so that, within a symbol, trades enter the
//! settlement channel in exactly the order they matched. The channel is
//! bounded and the send is awaited: when settlement falls behind, submit
//! blocks instead of dropping trades.

pub mod book;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::ids;
use crate::models::{BookLevel, Order, Side, Trade};

pub use book::{Book, BookOrder, Fill};

/// Matching engine for a single symbol.
pub struct SymbolEngine {
    symbol: String,
    book: Mutex<Book>,
    trade_tx: mpsc::Sender<Trade>,
}

impl SymbolEngine {
    fn new(symbol: String, trade_tx: mpsc::Sender<Trade>) -> Self {
        Self {
            symbol,
            book: Mutex::new(Book::new()),
            trade_tx,
        }
    }

    /// Rest the order and run continuous matching. Returns the trades this
    /// submission produced, already emitted downstream.
    pub async fn submit(&self, order: BookOrder) -> Vec<Trade> {
        let mut book = self.book.lock().await;
        book.rest(order);
        let fills = book.match_crossing();

        let mut trades = Vec::with_capacity(fills.len());
        for fill in fills {
            let trade = Trade {
                id: ids::generate(),
                symbol: self.symbol.clone(),
                buy_order_id: fill.buy_order_id,
                sell_order_id: fill.sell_order_id,
                price: fill.price,
                quantity: fill.quantity,
                created_at: chrono::Utc::now(),
            };
            // Backpressure: holding the symbol lock across this send keeps
            // per-symbol emission order intact
            if self.trade_tx.send(trade.clone()).await.is_err() {
                tracing::error!(
                    symbol = %self.symbol,
                    trade_id = %trade.id,
                    "trade channel closed, settlement is gone"
                );
            }
            trades.push(trade);
        }

        if !trades.is_empty() {
            tracing::debug!(symbol = %self.symbol, trades = trades.len(), "matching completed");
        }
        trades
    }

    /// Rest an order without matching. Book rebuild at startup only.
    pub async fn rest_unmatched(&self, order: BookOrder) {
        self.book.lock().await.rest(order);
    }

    /// Remove an order from the book. Returns the removed order when found.
    pub async fn cancel(&self, order_id: &str, side: Side) -> Option<BookOrder> {
        self.book.lock().await.remove(order_id, side)
    }

    /// Aggregated depth-N view of the real (engine-held) book.
    pub async fn snapshot(&self, depth: usize) -> (Vec<BookLevel>, Vec<BookLevel>) {
        self.book.lock().await.snapshot(depth)
    }

    pub async fn open_order_count(&self) -> usize {
        self.book.lock().await.len()
    }
}

/// All symbol engines plus the shared trade channel sender.
pub struct EngineHub {
    engines: RwLock<HashMap<String, Arc<SymbolEngine>>>,
    trade_tx: mpsc::Sender<Trade>,
}

impl EngineHub {
    /// Create the hub and the settlement end of the trade channel.
    pub fn new(channel_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Trade>) {
        let (trade_tx, trade_rx) = mpsc::channel(channel_capacity);
        let hub = Arc::new(Self {
            engines: RwLock::new(HashMap::new()),
            trade_tx,
        });
        (hub, trade_rx)
    }

    pub async fn engine(&self, symbol: &str) -> Arc<SymbolEngine> {
        if let Some(engine) = self.engines.read().await.get(symbol) {
            return engine.clone();
        }

        let mut engines = self.engines.write().await;
        engines
            .entry(symbol.to_string())
            .or_insert_with(|| {
                Arc::new(SymbolEngine::new(symbol.to_string(), self.trade_tx.clone()))
            })
            .clone()
    }

    /// Submit a persisted order to its symbol's engine.
    pub async fn submit(&self, order: &Order) -> Vec<Trade> {
        let engine = self.engine(&order.symbol).await;
        engine.submit(BookOrder::from_order(order)).await
    }

    pub async fn cancel(&self, symbol: &str, order_id: &str, side: Side) -> Option<BookOrder> {
        let engine = self.engine(symbol).await;
        engine.cancel(order_id, side).await
    }

    pub async fn snapshot(&self, symbol: &str, depth: usize) -> (Vec<BookLevel>, Vec<BookLevel>) {
        let engine = self.engine(symbol).await;
        engine.snapshot(depth).await
    }

    /// Rebuild every book from open orders, oldest first, without
    /// re-matching. Run once at startup before any submits.
    pub async fn rebuild(&self, open_orders: &[Order]) {
        for order in open_orders {
            let engine = self.engine(&order.symbol).await;
            engine.rest_unmatched(BookOrder::from_order(order)).await;
        }
        if !open_orders.is_empty() {
            tracing::info!(orders = open_orders.len(), "order books rebuilt from open orders");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, OrderType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn order(
        id: &str,
        side: Side,
        order_type: OrderType,
        price: Decimal,
        qty: Decimal,
    ) -> Order {
        Order {
            id: id.to_string(),
            user_id: format!("user-{}", id),
            symbol: "BTC/USDT".to_string(),
            order_type,
            side,
            price,
            quantity: qty,
            filled_qty: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_submit_emits_trades_on_channel() {
        let (hub, mut rx) = EngineHub::new(100);

        hub.submit(&order("s1", Side::Sell, OrderType::Limit, dec!(100), dec!(3)))
            .await;
        let trades = hub
            .submit(&order("b1", Side::Buy, OrderType::Limit, dec!(100), dec!(3)))
            .await;

        assert_eq!(trades.len(), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, trades[0].id);
        assert_eq!(received.symbol, "BTC/USDT");
        assert_eq!(received.price, dec!(100));
        assert_eq!(received.quantity, dec!(3));
        assert_eq!(received.buy_order_id, "b1");
        assert_eq!(received.sell_order_id, "s1");
    }

    #[tokio::test]
    async fn test_trades_emitted_in_match_order() {
        let (hub, mut rx) = EngineHub::new(100);

        hub.submit(&order("s1", Side::Sell, OrderType::Limit, dec!(100), dec!(5)))
            .await;
        hub.submit(&order("s2", Side::Sell, OrderType::Limit, dec!(101), dec!(5)))
            .await;
        hub.submit(&order("b1", Side::Buy, OrderType::Market, Decimal::ZERO, dec!(8)))
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.price, dec!(100));
        assert_eq!(second.price, dec!(101));
        assert_eq!(second.quantity, dec!(3));
    }

    #[tokio::test]
    async fn test_cancel_removes_resting_order() {
        let (hub, _rx) = EngineHub::new(100);

        hub.submit(&order("b1", Side::Buy, OrderType::Limit, dec!(100), dec!(5)))
            .await;
        let removed = hub.cancel("BTC/USDT", "b1", Side::Buy).await.unwrap();
        assert_eq!(removed.id, "b1");

        // Nothing left for a crossing sell to hit
        let trades = hub
            .submit(&order("s1", Side::Sell, OrderType::Limit, dec!(99), dec!(5)))
            .await;
        assert!(trades.is_empty());
    }

    #[tokio::test]
    async fn test_engines_are_per_symbol() {
        let (hub, _rx) = EngineHub::new(100);

        let mut eth_order = order("b1", Side::Buy, OrderType::Limit, dec!(100), dec!(5));
        eth_order.symbol = "ETH/USDT".to_string();
        hub.submit(&eth_order).await;

        // Same price sell on BTC must not cross the ETH bid
        let trades = hub
            .submit(&order("s1", Side::Sell, OrderType::Limit, dec!(100), dec!(5)))
            .await;
        assert!(trades.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_rests_without_matching() {
        let (hub, mut rx) = EngineHub::new(100);

        // Crossed orders rebuilt from the DB must not self-match
        let orders = vec![
            order("b1", Side::Buy, OrderType::Limit, dec!(101), dec!(5)),
            order("s1", Side::Sell, OrderType::Limit, dec!(100), dec!(5)),
        ];
        hub.rebuild(&orders).await;

        assert!(rx.try_recv().is_err());
        let engine = hub.engine("BTC/USDT").await;
        assert_eq!(engine.open_order_count().await, 2);
    }

    #[tokio::test]
    async fn test_partial_fill_status_progression() {
        let (hub, mut rx) = EngineHub::new(100);

        hub.submit(&order("s1", Side::Sell, OrderType::Limit, dec!(100), dec!(10)))
            .await;
        let trades = hub
            .submit(&order("b1", Side::Buy, OrderType::Limit, dec!(100), dec!(4)))
            .await;
        assert_eq!(trades[0].quantity, dec!(4));

        // Remaining 6 still on the book; a second buy keeps filling
        let trades = hub
            .submit(&order("b2", Side::Buy, OrderType::Limit, dec!(100), dec!(6)))
            .await;
        assert_eq!(trades[0].quantity, dec!(6));

        // Drain channel: two trades total
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
