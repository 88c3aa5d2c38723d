//! Settlement pipeline - the single consumer of the trade channel
//!
//! Accumulates trades into a batch and flushes on size or on a 10 ms tick,
//! whichever comes first. Each flush is one transaction: trades inserted,
//! order fill state advanced, balances moved through the ledger, fee
//! records written. Trades where either side belongs to the virtual maker
//! are dropped here - the controller already settled those directly.
//!
//! A failed batch is rolled back and logged as an operational alert; it is
//! not retried, because re-running a partially observed batch would
//! double-settle.

use std::collections::{HashMap, HashSet};

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::{CoreError, CoreResult};
use crate::events::EventBus;
use crate::fees::FeeService;
use crate::ledger::Ledger;
use crate::models::{split_symbol, FeeRole, Order, OrderStatus, Side, Trade, UserKind};
use crate::persistence::{orders, trades, users};

/// Flush when the batch reaches this many trades.
pub const BATCH_LIMIT: usize = 100;
/// ... or when this much time has passed with a non-empty batch.
pub const FLUSH_TICK: Duration = Duration::from_millis(10);

/// The earlier order is the maker of a fill; an exact timestamp tie makes
/// the buyer the taker.
pub fn buyer_is_maker(buy: &Order, sell: &Order) -> bool {
    buy.created_at < sell.created_at
}

pub struct SettlementPipeline {
    pool: PgPool,
    ledger: Ledger,
    fees: FeeService,
    events: EventBus,
    rx: mpsc::Receiver<Trade>,
}

impl SettlementPipeline {
    pub fn new(
        pool: PgPool,
        ledger: Ledger,
        fees: FeeService,
        events: EventBus,
        rx: mpsc::Receiver<Trade>,
    ) -> Self {
        Self {
            pool,
            ledger,
            fees,
            events,
            rx,
        }
    }

    /// Consume the channel until it closes. Spawn exactly one of these.
    pub async fn run(mut self) {
        let mut batch: Vec<Trade> = Vec::with_capacity(BATCH_LIMIT);
        let mut ticker = interval(FLUSH_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("settlement pipeline started");
        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(trade) => {
                        batch.push(trade);
                        if batch.len() >= BATCH_LIMIT {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => {
                        self.flush(&mut batch).await;
                        tracing::info!("trade channel closed, settlement pipeline exiting");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }
    }

    async fn flush(&self, batch: &mut Vec<Trade>) {
        if batch.is_empty() {
            return;
        }
        let taken = std::mem::take(batch);
        let count = taken.len();

        if let Err(err) = self.settle_batch(taken).await {
            // The engine already applied these fills in memory; losing the
            // batch means persistent state diverged until reconciled.
            tracing::error!(
                error = %err,
                trades = count,
                "settlement batch rolled back, manual reconciliation required"
            );
        }
    }

    /// Settle one batch in a single transaction scope.
    pub async fn settle_batch(&self, batch: Vec<Trade>) -> CoreResult<()> {
        // Resolve every referenced order, then every referenced user
        let mut order_ids: Vec<String> = Vec::with_capacity(batch.len() * 2);
        for trade in &batch {
            order_ids.push(trade.buy_order_id.clone());
            order_ids.push(trade.sell_order_id.clone());
        }
        order_ids.sort();
        order_ids.dedup();

        let mut order_map = orders::fetch_by_ids(&self.pool, &order_ids).await?;

        let mut user_ids: Vec<String> =
            order_map.values().map(|o| o.user_id.clone()).collect();
        user_ids.sort();
        user_ids.dedup();
        let user_map = users::fetch_by_ids(&self.pool, &user_ids).await?;

        // Virtual-maker filter: the controller settles its own fills
        let mut real_trades: Vec<Trade> = Vec::with_capacity(batch.len());
        for trade in batch {
            let (buy, sell) = match (
                order_map.get(&trade.buy_order_id),
                order_map.get(&trade.sell_order_id),
            ) {
                (Some(b), Some(s)) => (b, s),
                _ => {
                    tracing::error!(
                        trade_id = %trade.id,
                        buy_order_id = %trade.buy_order_id,
                        sell_order_id = %trade.sell_order_id,
                        "trade references a missing order, dropping from batch"
                    );
                    continue;
                }
            };

            let virtual_side = [&buy.user_id, &sell.user_id].iter().any(|uid| {
                user_map
                    .get(uid.as_str())
                    .map(|u| u.kind == UserKind::VirtualMaker)
                    .unwrap_or(false)
            });
            if virtual_side {
                tracing::debug!(trade_id = %trade.id, "skipping maker-settled trade");
                continue;
            }

            real_trades.push(trade);
        }

        if real_trades.is_empty() {
            return Ok(());
        }

        let mut tx = self.ledger.begin().await?;

        trades::insert_batch(&mut tx, &real_trades).await?;

        let mut touched: HashSet<String> = HashSet::new();
        let mut taker_sides: HashMap<String, Side> = HashMap::new();

        for trade in &real_trades {
            // Advance fill state from the persisted prior, re-deriving
            // rather than trusting the in-memory fill the engine applied
            for order_id in [&trade.buy_order_id, &trade.sell_order_id] {
                let order = order_map.get_mut(order_id).ok_or_else(|| {
                    CoreError::InvariantViolation(format!("order {} disappeared", order_id))
                })?;
                order.filled_qty += trade.quantity;
                if order.filled_qty > order.quantity {
                    return Err(CoreError::InvariantViolation(format!(
                        "order {} overfilled: {} of {}",
                        order_id, order.filled_qty, order.quantity
                    )));
                }
                order.status = if order.is_filled() {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Partial
                };
                touched.insert(order_id.clone());
            }

            let buy = order_map[&trade.buy_order_id].clone();
            let sell = order_map[&trade.sell_order_id].clone();

            let (base_asset, quote_asset) = split_symbol(&trade.symbol).ok_or_else(|| {
                CoreError::InvariantViolation(format!("malformed symbol {}", trade.symbol))
            })?;

            let buyer = user_map.get(&buy.user_id).ok_or_else(|| {
                CoreError::InvariantViolation(format!("user {} missing", buy.user_id))
            })?;
            let seller = user_map.get(&sell.user_id).ok_or_else(|| {
                CoreError::InvariantViolation(format!("user {} missing", sell.user_id))
            })?;

            let buyer_maker = buyer_is_maker(&buy, &sell);
            let (buyer_role, seller_role) = if buyer_maker {
                (FeeRole::Maker, FeeRole::Taker)
            } else {
                (FeeRole::Taker, FeeRole::Maker)
            };
            taker_sides.insert(
                trade.id.clone(),
                if buyer_maker { Side::Sell } else { Side::Buy },
            );

            let cost = trade.price * trade.quantity;
            let (buyer_fee, buyer_rate) = self
                .fees
                .calculate(buyer.user_level, buyer_role, trade.quantity)
                .await;
            let (seller_fee, seller_rate) =
                self.fees.calculate(seller.user_level, seller_role, cost).await;

            Ledger::settle_fill(
                &mut tx,
                &buy.user_id,
                &sell.user_id,
                base_asset,
                quote_asset,
                trade.quantity,
                trade.price,
                buyer_fee,
                seller_fee,
            )
            .await?;

            self.fees
                .record(
                    &mut tx,
                    &buy.user_id,
                    &buy.id,
                    &trade.id,
                    base_asset,
                    buyer_fee,
                    buyer_rate,
                    buyer_role,
                )
                .await?;
            self.fees
                .record(
                    &mut tx,
                    &sell.user_id,
                    &sell.id,
                    &trade.id,
                    quote_asset,
                    seller_fee,
                    seller_rate,
                    seller_role,
                )
                .await?;
        }

        for order_id in &touched {
            let order = &order_map[order_id];
            orders::update_fill(&mut tx, order_id, order.filled_qty, order.status).await?;
        }

        tx.commit().await?;

        // Visible only after the commit
        for trade in &real_trades {
            let side = taker_sides
                .get(&trade.id)
                .copied()
                .unwrap_or(Side::Buy);
            self.events.publish_trade(
                &trade.symbol,
                trade.price,
                trade.quantity,
                side,
                trade.created_at,
            );
        }

        let symbols: HashSet<&str> =
            real_trades.iter().map(|t| t.symbol.as_str()).collect();
        for symbol in symbols {
            if let Ok(Some(ticker)) = trades::ticker_24h(&self.pool, symbol).await {
                self.events.publish(crate::events::ExchangeEvent::Ticker {
                    symbol: ticker.symbol.clone(),
                    last_price: ticker.last_price.to_string(),
                    change_24h: ticker.change_24h.to_string(),
                    high_24h: ticker.high_24h.to_string(),
                    low_24h: ticker.low_24h.to_string(),
                    volume_24h: ticker.volume_24h.to_string(),
                });
            }
        }

        tracing::info!(trades = real_trades.len(), "settlement batch committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;

    fn order_at(id: &str, side: Side, seconds_ago: i64) -> Order {
        Order {
            id: id.to_string(),
            user_id: format!("user-{}", id),
            symbol: "BTC/USDT".to_string(),
            order_type: OrderType::Limit,
            side,
            price: dec!(100),
            quantity: dec!(5),
            filled_qty: dec!(0),
            status: OrderStatus::Pending,
            created_at: Utc::now() - ChronoDuration::seconds(seconds_ago),
        }
    }

    #[test]
    fn test_earlier_order_is_maker() {
        let resting_buy = order_at("b", Side::Buy, 60);
        let aggressing_sell = order_at("s", Side::Sell, 0);
        assert!(buyer_is_maker(&resting_buy, &aggressing_sell));

        let resting_sell = order_at("s", Side::Sell, 60);
        let aggressing_buy = order_at("b", Side::Buy, 0);
        assert!(!buyer_is_maker(&aggressing_buy, &resting_sell));
    }

    #[test]
    fn test_tie_makes_buyer_taker() {
        let now = Utc::now();
        let mut buy = order_at("b", Side::Buy, 0);
        let mut sell = order_at("s", Side::Sell, 0);
        buy.created_at = now;
        sell.created_at = now;
        assert!(!buyer_is_maker(&buy, &sell));
    }
}
