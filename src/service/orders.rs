//! Order service - submit and cancel
//!
//! Submit is freeze-then-book: funds are frozen first, the order row is
//! created, then the order goes to the engine. Cancel re-reads the order
//! under its row lock so a concurrent maker fill cannot be lost, removes
//! it from the engine and returns exactly the unfilled frozen value.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;

use crate::engine::EngineHub;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::ledger::Ledger;
use crate::models::{
    split_symbol, Order, OrderStatus, OrderType, PairStatus, Side, TradingPair,
};
use crate::persistence::{orders, pairs};

/// Submit-order request as the gateway hands it over.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOrderRequest {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    /// Required for limit orders, and for market orders too: the freeze
    /// amount of a market buy is computed from it.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

pub struct OrderService {
    pool: PgPool,
    ledger: Ledger,
    hub: Arc<EngineHub>,
}

impl OrderService {
    pub fn new(pool: PgPool, ledger: Ledger, hub: Arc<EngineHub>) -> Self {
        Self { pool, ledger, hub }
    }

    fn validate(
        &self,
        pair: &TradingPair,
        req: &SubmitOrderRequest,
    ) -> CoreResult<Decimal> {
        if pair.status != PairStatus::Active {
            return Err(CoreError::InvalidArgument(format!(
                "trading pair {} is not active",
                pair.symbol
            )));
        }

        if req.quantity <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument(
                "quantity must be positive".to_string(),
            ));
        }
        if pair.min_qty > Decimal::ZERO && req.quantity < pair.min_qty {
            return Err(CoreError::InvalidArgument(format!(
                "quantity {} below minimum {}",
                req.quantity, pair.min_qty
            )));
        }
        if pair.max_qty > Decimal::ZERO && req.quantity > pair.max_qty {
            return Err(CoreError::InvalidArgument(format!(
                "quantity {} above maximum {}",
                req.quantity, pair.max_qty
            )));
        }

        // Market orders carry a price as well: it anchors the freeze
        let price = req.price.ok_or_else(|| {
            CoreError::InvalidArgument("price is required".to_string())
        })?;
        if price <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument(
                "price must be positive".to_string(),
            ));
        }
        if req.order_type == OrderType::Limit {
            if pair.min_price > Decimal::ZERO && price < pair.min_price {
                return Err(CoreError::InvalidArgument(format!(
                    "price {} below minimum {}",
                    price, pair.min_price
                )));
            }
            if pair.max_price > Decimal::ZERO && price > pair.max_price {
                return Err(CoreError::InvalidArgument(format!(
                    "price {} above maximum {}",
                    price, pair.max_price
                )));
            }
        }

        Ok(price)
    }

    /// Freeze funds, create the order, hand it to the engine.
    pub async fn submit(&self, user_id: &str, req: SubmitOrderRequest) -> CoreResult<Order> {
        let pair = pairs::get_by_symbol(&self.pool, &req.symbol)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("trading pair {} not found", req.symbol))
            })?;

        let price = self.validate(&pair, &req)?;

        let (freeze_asset, freeze_amount) = match req.side {
            Side::Buy => (pair.quote_asset.as_str(), price * req.quantity),
            Side::Sell => (pair.base_asset.as_str(), req.quantity),
        };
        self.ledger.freeze(user_id, freeze_asset, freeze_amount).await?;

        let order = Order {
            id: ids::generate(),
            user_id: user_id.to_string(),
            symbol: req.symbol.clone(),
            order_type: req.order_type,
            side: req.side,
            price,
            quantity: req.quantity,
            filled_qty: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };

        let inserted = async {
            let mut conn = self.pool.acquire().await?;
            orders::insert(&mut conn, &order).await
        }
        .await;

        if let Err(err) = inserted {
            // Leave no partial state: hand the frozen funds back
            if let Err(unfreeze_err) = self
                .ledger
                .unfreeze(user_id, freeze_asset, freeze_amount)
                .await
            {
                tracing::error!(
                    user_id,
                    error = %unfreeze_err,
                    "failed to release freeze after order insert failure"
                );
            }
            return Err(err);
        }

        self.hub.submit(&order).await;

        tracing::info!(
            order_id = %order.id,
            user_id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            price = %order.price,
            qty = %order.quantity,
            "order accepted"
        );
        Ok(order)
    }

    /// Cancel an open order and release the unfilled frozen value.
    pub async fn cancel(&self, user_id: &str, order_id: &str) -> CoreResult<Order> {
        let mut tx = self.pool.begin().await?;

        let Some(order) = orders::lock_for_update(&mut tx, order_id).await? else {
            return Err(CoreError::NotFound(format!("order {} not found", order_id)));
        };
        if order.user_id != user_id {
            // Not yours: indistinguishable from absent
            return Err(CoreError::NotFound(format!("order {} not found", order_id)));
        }
        if !order.status.is_open() {
            return Err(CoreError::InvalidArgument(format!(
                "order {} is {} and cannot be cancelled",
                order_id,
                order.status.as_str()
            )));
        }

        let (base_asset, quote_asset) = split_symbol(&order.symbol).ok_or_else(|| {
            CoreError::InvariantViolation(format!("malformed symbol {}", order.symbol))
        })?;

        self.hub.cancel(&order.symbol, order_id, order.side).await;

        let remaining = order.remaining_qty();
        if remaining > Decimal::ZERO {
            match order.side {
                Side::Buy => {
                    Ledger::unfreeze_on(
                        &mut tx,
                        user_id,
                        quote_asset,
                        order.price * remaining,
                    )
                    .await?
                }
                Side::Sell => {
                    Ledger::unfreeze_on(&mut tx, user_id, base_asset, remaining).await?
                }
            }
        }

        let status = if order.filled_qty > Decimal::ZERO {
            OrderStatus::PartialCancelled
        } else {
            OrderStatus::Cancelled
        };
        orders::update_status(&mut tx, order_id, status).await?;

        tx.commit().await?;

        tracing::info!(
            order_id,
            user_id,
            status = status.as_str(),
            released = %remaining,
            "order cancelled"
        );

        let mut cancelled = order;
        cancelled.status = status;
        Ok(cancelled)
    }

    pub async fn get(&self, user_id: &str, order_id: &str) -> CoreResult<Order> {
        let order = orders::get_by_id(&self.pool, order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| CoreError::NotFound(format!("order {} not found", order_id)))?;
        Ok(order)
    }

    pub async fn list(
        &self,
        user_id: &str,
        symbol: Option<&str>,
        status: Option<OrderStatus>,
    ) -> CoreResult<Vec<Order>> {
        orders::list_for_user(&self.pool, user_id, symbol, status, 100).await
    }
}
