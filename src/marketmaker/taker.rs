//! Loop C - the aggressive taker
//!
//! Every 200 ms the taker sweeps all resting real orders on every active
//! symbol and fills each one against a freshly minted virtual counter
//! order. The fill is settled directly in one transaction - trade row,
//! order state, user balances - bypassing both the engine and the
//! settlement pipeline; the pipeline's virtual-maker filter exists exactly
//! so these fills are not settled twice. A realized-PnL row is written per
//! fill, which is what the inventory balancer later reads.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::ledger::Ledger;
use crate::models::{
    split_symbol, MarketMakerPnl, Order, OrderStatus, OrderType, Side, Trade, TradingPair,
};
use crate::persistence::{orders, pnl, trades};
use crate::precision;

use super::MarketMaker;

const SWEEP_INTERVAL: Duration = Duration::from_millis(200);

/// Ticks per 10 s window; the synthetic-print probability divides the
/// configured per-10s count by this.
const TICKS_PER_10S: f64 = 50.0;

/// Price the maker fills a real order at. When the user's limit crosses
/// the best opposing virtual quote the fill prints at the quote - a price
/// improvement for the user; otherwise at the user's own price.
pub fn improved_price(side: Side, order_price: Decimal, best_opposite: Option<Decimal>) -> Decimal {
    match (side, best_opposite) {
        (Side::Buy, Some(best_ask)) if order_price > best_ask => best_ask,
        (Side::Sell, Some(best_bid)) if order_price < best_bid => best_bid,
        _ => order_price,
    }
}

/// Realized PnL of the maker leg against the current tape price:
/// `(profit_loss, profit_percent)`. A maker buy below market (or sell
/// above it) is profit.
pub fn maker_pnl(
    maker_side: Side,
    execute_price: Decimal,
    market_price: Decimal,
    qty: Decimal,
) -> (Decimal, Decimal) {
    match maker_side {
        Side::Buy => {
            let profit = (market_price - execute_price) * qty * market_price;
            let percent = if execute_price.is_zero() {
                Decimal::ZERO
            } else {
                (market_price - execute_price) / execute_price * Decimal::ONE_HUNDRED
            };
            (profit, percent)
        }
        Side::Sell => {
            let profit = (execute_price - market_price) * qty * market_price;
            let percent = if market_price.is_zero() {
                Decimal::ZERO
            } else {
                (execute_price - market_price) / market_price * Decimal::ONE_HUNDRED
            };
            (profit, percent)
        }
    }
}

/// Loop C entry.
pub(super) async fn taker_loop(mm: Arc<MarketMaker>) {
    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        for symbol in mm.active_symbols().await {
            if let Err(err) = sweep_symbol(&mm, &symbol).await {
                tracing::warn!(symbol = %symbol, error = %err, "taker sweep failed");
            }
            if let Some(pair) = mm.config_for(&symbol).await {
                if let Err(err) = maybe_print_tape(&mm, &pair).await {
                    tracing::warn!(symbol = %symbol, error = %err, "tape print failed");
                }
            }
        }
    }
}

/// Fill every resting real order on both sides of a symbol.
async fn sweep_symbol(mm: &MarketMaker, symbol: &str) -> CoreResult<()> {
    let bids = orders::open_real_orders(&mm.pool, symbol, Side::Buy).await?;
    let asks = orders::open_real_orders(&mm.pool, symbol, Side::Sell).await?;
    if bids.is_empty() && asks.is_empty() {
        return Ok(());
    }

    let Some(market_price) = trades::last_price(&mm.pool, symbol).await? else {
        return Ok(());
    };

    tracing::debug!(
        symbol,
        bids = bids.len(),
        asks = asks.len(),
        "real orders found, eating"
    );

    for order in bids.iter().chain(asks.iter()) {
        if let Err(err) = eat_order(mm, symbol, &order.id, market_price).await {
            tracing::warn!(
                symbol,
                order_id = %order.id,
                error = %err,
                "failed to eat order"
            );
        }
    }
    Ok(())
}

/// Fill one real order completely against a virtual counter order.
pub(crate) async fn eat_order(
    mm: &MarketMaker,
    symbol: &str,
    order_id: &str,
    market_price: Decimal,
) -> CoreResult<Option<Trade>> {
    let (base_asset, quote_asset) = split_symbol(symbol)
        .ok_or_else(|| CoreError::InvalidArgument(format!("malformed symbol {}", symbol)))?;

    // Best opposing virtual quote, read before taking the row lock
    let best_ask =
        orders::best_virtual_quote(&mm.pool, symbol, &mm.maker_id, Side::Sell).await?;
    let best_bid =
        orders::best_virtual_quote(&mm.pool, symbol, &mm.maker_id, Side::Buy).await?;

    let mut tx = mm.pool.begin().await?;

    // Re-read under the row lock; concurrent fill progress must not be lost
    let Some(fresh) = orders::lock_for_update(&mut tx, order_id).await? else {
        return Ok(None);
    };
    if !fresh.status.is_open() {
        return Ok(None);
    }
    let remaining = fresh.remaining_qty();
    if remaining <= Decimal::ZERO {
        return Ok(None);
    }

    let best_opposite = match fresh.side {
        Side::Buy => best_ask.map(|o| o.price),
        Side::Sell => best_bid.map(|o| o.price),
    };
    let match_price = improved_price(fresh.side, fresh.price, best_opposite);
    let maker_side = fresh.side.opposite();

    // Counter order is born fully filled; it exists for the audit trail
    let counter = Order {
        id: ids::generate(),
        user_id: mm.maker_id.clone(),
        symbol: symbol.to_string(),
        order_type: OrderType::Limit,
        side: maker_side,
        price: match_price,
        quantity: remaining,
        filled_qty: remaining,
        status: OrderStatus::Filled,
        created_at: Utc::now(),
    };
    orders::insert(&mut tx, &counter).await?;

    let (buy_order_id, sell_order_id) = match maker_side {
        Side::Buy => (counter.id.clone(), fresh.id.clone()),
        Side::Sell => (fresh.id.clone(), counter.id.clone()),
    };
    let trade = Trade {
        id: ids::generate(),
        symbol: symbol.to_string(),
        buy_order_id,
        sell_order_id,
        price: match_price,
        quantity: remaining,
        created_at: Utc::now(),
    };
    trades::insert(&mut tx, &trade).await?;

    // Advance the real order to filled
    let new_filled = fresh.filled_qty + remaining;
    orders::update_fill(&mut tx, &fresh.id, new_filled, OrderStatus::Filled).await?;

    // Settle the user's leg directly. No fee on either leg of a maker
    // fill; the maker's own inventory is tracked through the PnL ledger
    // against its seeded balances.
    let trade_value = match_price * remaining;
    match fresh.side {
        Side::Buy => {
            Ledger::debit_frozen(&mut tx, &fresh.user_id, quote_asset, trade_value).await?;
            Ledger::credit_available(&mut tx, &fresh.user_id, base_asset, remaining).await?;
            // Frozen at the limit price but filled better: release the
            // difference
            let refund = (fresh.price - match_price) * remaining;
            if refund > Decimal::ZERO {
                Ledger::unfreeze_on(&mut tx, &fresh.user_id, quote_asset, refund).await?;
            }
        }
        Side::Sell => {
            Ledger::debit_frozen(&mut tx, &fresh.user_id, base_asset, remaining).await?;
            Ledger::credit_available(&mut tx, &fresh.user_id, quote_asset, trade_value).await?;
        }
    }

    let (profit_loss, profit_percent) =
        maker_pnl(maker_side, match_price, market_price, remaining);
    pnl::insert(
        &mut tx,
        &MarketMakerPnl {
            id: ids::generate(),
            symbol: symbol.to_string(),
            trade_id: trade.id.clone(),
            side: maker_side,
            execute_price: match_price,
            market_price,
            quantity: remaining,
            profit_loss,
            profit_percent,
            created_at: Utc::now(),
        },
    )
    .await?;

    tx.commit().await?;

    // A filled order must leave the engine book or a stale re-match could
    // double-fill it
    mm.hub.cancel(symbol, &fresh.id, fresh.side).await;

    mm.events
        .publish_trade(symbol, match_price, remaining, maker_side, trade.created_at);

    tracing::info!(
        symbol,
        order_id = %fresh.id,
        side = fresh.side.as_str(),
        price = %match_price,
        qty = %remaining,
        pnl = %profit_loss,
        "real order filled by maker"
    );

    Ok(Some(trade))
}

/// With probability `virtual_trade_per_10s / 50` per tick, print a trade
/// at the best virtual bid (tape ticks down) or best virtual ask (tape
/// ticks up), equal odds.
async fn maybe_print_tape(mm: &MarketMaker, pair: &TradingPair) -> CoreResult<()> {
    let per_10s = pair.virtual_trade_per_10s.clamp(1, 30);
    let probability = per_10s as f64 / TICKS_PER_10S;
    let fire = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0.0..1.0) < probability
    };
    if !fire {
        return Ok(());
    }

    let symbol = pair.symbol.as_str();
    let Some(best_bid) =
        orders::best_virtual_quote(&mm.pool, symbol, &mm.maker_id, Side::Buy).await?
    else {
        return Ok(());
    };
    let Some(best_ask) =
        orders::best_virtual_quote(&mm.pool, symbol, &mm.maker_id, Side::Sell).await?
    else {
        return Ok(());
    };

    let (price, side) = {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(0.5) {
            (best_bid.price, Side::Sell) // hit the bid, tape ticks down
        } else {
            (best_ask.price, Side::Buy) // lift the ask, tape ticks up
        }
    };

    let qty = {
        let mut rng = rand::thread_rng();
        let (lo, hi) = precision::qty_range_for_price(price);
        let raw = lo
            + (hi - lo)
                * Decimal::from_f64(rng.gen_range(0.0..1.0)).unwrap_or(Decimal::ZERO);
        precision::round_qty(raw, price)
    };
    if qty <= Decimal::ZERO {
        return Ok(());
    }

    super::quoting::insert_synthetic_trade(mm, symbol, price, qty, side).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_improved_price_buy_crossing_ask() {
        // User bids 105, best virtual ask 101: fill at 101
        assert_eq!(
            improved_price(Side::Buy, dec!(105), Some(dec!(101))),
            dec!(101)
        );
        // User bids below the ask: fill at own price
        assert_eq!(
            improved_price(Side::Buy, dec!(100), Some(dec!(101))),
            dec!(100)
        );
        // No virtual quote: own price
        assert_eq!(improved_price(Side::Buy, dec!(100), None), dec!(100));
    }

    #[test]
    fn test_improved_price_sell_crossing_bid() {
        // User asks 95, best virtual bid 99: fill at 99
        assert_eq!(
            improved_price(Side::Sell, dec!(95), Some(dec!(99))),
            dec!(99)
        );
        assert_eq!(
            improved_price(Side::Sell, dec!(100), Some(dec!(99))),
            dec!(100)
        );
    }

    #[test]
    fn test_maker_pnl_buy_below_market_is_profit() {
        // Maker bought at 98, market at 100, qty 2:
        // (100 - 98) * 2 * 100 = 400
        let (profit, percent) = maker_pnl(Side::Buy, dec!(98), dec!(100), dec!(2));
        assert_eq!(profit, dec!(400));
        assert!(percent > dec!(2) && percent < dec!(2.05));
    }

    #[test]
    fn test_maker_pnl_sell_above_market_is_profit() {
        // Maker sold at 103, market at 100, qty 1:
        // (103 - 100) * 1 * 100 = 300
        let (profit, percent) = maker_pnl(Side::Sell, dec!(103), dec!(100), dec!(1));
        assert_eq!(profit, dec!(300));
        assert_eq!(percent, dec!(3));
    }

    #[test]
    fn test_maker_pnl_losing_side_is_negative() {
        let (profit, _) = maker_pnl(Side::Buy, dec!(102), dec!(100), dec!(1));
        assert!(profit < Decimal::ZERO);
        let (profit, _) = maker_pnl(Side::Sell, dec!(97), dec!(100), dec!(1));
        assert!(profit < Decimal::ZERO);
    }

    #[test]
    fn test_maker_pnl_zero_price_guard() {
        let (_, percent) = maker_pnl(Side::Buy, dec!(0), dec!(100), dec!(1));
        assert_eq!(percent, Decimal::ZERO);
    }
}
