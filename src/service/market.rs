//! Market data service - public order book and ticker
//!
//! The public book merges two sources: the engine's view of resting real
//! orders and the maker's display rows from the DB. Both are aggregated
//! at display precision so they land on the same levels.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::engine::EngineHub;
use crate::error::{CoreError, CoreResult};
use crate::models::{BookLevel, OrderBookView, Side, Ticker};
use crate::persistence::{orders, pairs, trades};
use crate::precision;

pub struct MarketService {
    pool: PgPool,
    hub: Arc<EngineHub>,
    maker_id: String,
}

impl MarketService {
    pub fn new(pool: PgPool, hub: Arc<EngineHub>, maker_id: String) -> Self {
        Self { pool, hub, maker_id }
    }

    /// Depth-N public book: engine-held real orders merged with the
    /// maker's virtual display rows.
    pub async fn order_book(&self, symbol: &str, depth: usize) -> CoreResult<OrderBookView> {
        if pairs::get_by_symbol(&self.pool, symbol).await?.is_none() {
            return Err(CoreError::NotFound(format!(
                "trading pair {} not found",
                symbol
            )));
        }
        let depth = depth.clamp(1, 100);

        let last_price = trades::last_price(&self.pool, symbol).await?;

        let (real_bids, real_asks) = self.hub.snapshot(symbol, depth).await;

        let fetch = depth as i64 * 2;
        let virtual_bids =
            orders::virtual_open_orders(&self.pool, symbol, &self.maker_id, Side::Buy, fetch)
                .await?;
        let virtual_asks =
            orders::virtual_open_orders(&self.pool, symbol, &self.maker_id, Side::Sell, fetch)
                .await?;

        // One precision for the merged view, anchored on the tape
        let dp = last_price
            .or_else(|| real_bids.first().map(|l| l.price))
            .or_else(|| real_asks.first().map(|l| l.price))
            .map(precision::price_precision)
            .unwrap_or(3);

        let mut bid_map: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for level in &real_bids {
            *bid_map.entry(level.price.round_dp(dp)).or_default() += level.quantity;
        }
        for order in &virtual_bids {
            *bid_map.entry(order.price.round_dp(dp)).or_default() += order.remaining_qty();
        }

        let mut ask_map: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for level in &real_asks {
            *ask_map.entry(level.price.round_dp(dp)).or_default() += level.quantity;
        }
        for order in &virtual_asks {
            *ask_map.entry(order.price.round_dp(dp)).or_default() += order.remaining_qty();
        }

        Ok(OrderBookView {
            symbol: symbol.to_string(),
            bids: bid_map
                .into_iter()
                .rev()
                .take(depth)
                .map(|(price, quantity)| BookLevel { price, quantity })
                .collect(),
            asks: ask_map
                .into_iter()
                .take(depth)
                .map(|(price, quantity)| BookLevel { price, quantity })
                .collect(),
        })
    }

    /// 24-hour summary. A symbol that exists but never traded reports
    /// zeros rather than an error.
    pub async fn ticker(&self, symbol: &str) -> CoreResult<Ticker> {
        if pairs::get_by_symbol(&self.pool, symbol).await?.is_none() {
            return Err(CoreError::NotFound(format!(
                "trading pair {} not found",
                symbol
            )));
        }

        Ok(trades::ticker_24h(&self.pool, symbol)
            .await?
            .unwrap_or_else(|| Ticker {
                symbol: symbol.to_string(),
                last_price: Decimal::ZERO,
                change_24h: Decimal::ZERO,
                high_24h: Decimal::ZERO,
                low_24h: Decimal::ZERO,
                volume_24h: Decimal::ZERO,
                updated_at: Utc::now(),
            }))
    }

    /// Tickers for every active pair.
    pub async fn all_tickers(&self) -> CoreResult<Vec<Ticker>> {
        let mut tickers = Vec::new();
        for pair in pairs::list_active(&self.pool).await? {
            tickers.push(self.ticker(&pair.symbol).await?);
        }
        Ok(tickers)
    }

    /// Recent tape for a symbol.
    pub async fn recent_trades(
        &self,
        symbol: &str,
        limit: i64,
    ) -> CoreResult<Vec<crate::models::Trade>> {
        trades::recent(&self.pool, symbol, limit.clamp(1, 500)).await
    }
}
