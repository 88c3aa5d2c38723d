//! Loop B - per-symbol quoting
//!
//! On every refresh the task reads the last traded price, deletes the
//! maker's open display orders and lays a fresh ladder of bids and asks
//! around the adjusted midpoint. A second timer prints a synthetic tape
//! trade on a randomized cadence so the symbol never looks dead.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use crate::error::CoreResult;
use crate::events::{ExchangeEvent, LevelMsg};
use crate::ids;
use crate::models::{Order, OrderStatus, OrderType, Side, Trade, TradingPair};
use crate::persistence::{orders, pairs, trades};
use crate::precision;

use super::MarketMaker;

/// Book refresh cadence by activity level: level 1 -> 20 s down to
/// level 8 -> 6 s, with a 1 s fast path for levels 9 and 10.
pub fn refresh_interval_secs(activity_level: i32) -> u64 {
    let level = activity_level.clamp(1, 10);
    if level >= 9 {
        1
    } else {
        (22 - 2 * level) as u64
    }
}

/// Synthetic-trade cadence: uniform in [0.7, 1.3] x trade_frequency,
/// with the frequency clamped to its configured range.
pub fn trade_tick_secs(trade_frequency: i32, rng: &mut impl Rng) -> f64 {
    let freq = trade_frequency.clamp(5, 60) as f64;
    rng.gen_range(0.7 * freq..1.3 * freq)
}

/// One quoted level: side, price, quantity.
pub type QuoteLevel = (Side, Decimal, Decimal);

/// Build the full ladder for one refresh.
///
/// Level k (1..=depth) prices at `P * (1 -/+ k*max_spread/depth + adj)`
/// where `max_spread = price_volatility * price_spread_ratio`; quantity is
/// a price-bucket base scaled by `(1 + 0.6k)` and a noise envelope that
/// widens with activity. Prices and quantities are rounded to display
/// precision so the ladder aggregates cleanly.
pub fn ladder(
    pair: &TradingPair,
    last_price: Decimal,
    adj: Decimal,
    rng: &mut impl Rng,
) -> Vec<QuoteLevel> {
    let depth = pair.orderbook_depth.clamp(5, 30);
    let volatility = if pair.price_volatility > Decimal::ZERO {
        pair.price_volatility
    } else {
        Decimal::new(1, 2) // 0.01
    };
    let spread_ratio = if pair.price_spread_ratio > Decimal::ZERO {
        pair.price_spread_ratio
    } else {
        Decimal::ONE
    };
    let max_spread = volatility * spread_ratio;

    let noise = 0.2 + 0.06 * pair.activity_level.clamp(1, 10) as f64;
    let (base_lo, base_hi) = precision::qty_range_for_price(last_price);

    let mut levels = Vec::with_capacity(depth as usize * 2);
    for k in 1..=depth {
        let offset = max_spread * Decimal::from(k) / Decimal::from(depth);

        let bid_price = last_price * (Decimal::ONE - offset + adj);
        let ask_price = last_price * (Decimal::ONE + offset + adj);

        for (side, price) in [(Side::Buy, bid_price), (Side::Sell, ask_price)] {
            let base = base_lo
                + (base_hi - base_lo)
                    * Decimal::from_f64(rng.gen_range(0.0..1.0)).unwrap_or_default();
            let ramp = Decimal::ONE + Decimal::new(6, 1) * Decimal::from(k); // 1 + 0.6k
            let envelope =
                Decimal::from_f64(1.0 - noise + 2.0 * noise * rng.gen_range(0.0..1.0))
                    .unwrap_or(Decimal::ONE);

            let price = precision::round_price(price);
            let qty = precision::round_qty(base * ramp * envelope, price);
            if price > Decimal::ZERO && qty > Decimal::ZERO {
                levels.push((side, price, qty));
            }
        }
    }
    levels
}

/// Tear down and re-lay the virtual book for one symbol. Also runs from
/// the balancer when the adjustment shifts hard.
pub(crate) async fn refresh_symbol(mm: &MarketMaker, pair: &TradingPair) -> CoreResult<()> {
    let symbol = pair.symbol.as_str();

    let Some(last_price) = trades::last_price(&mm.pool, symbol).await? else {
        // No tape yet; nothing to anchor quotes to
        return Ok(());
    };
    if last_price <= Decimal::ZERO {
        return Ok(());
    }

    mm.purge_virtual_orders(symbol).await?;

    let adj = mm.adjustment_for(symbol).await;
    let levels = {
        let mut rng = rand::thread_rng();
        ladder(pair, last_price, adj, &mut rng)
    };

    let mut conn = mm.pool.acquire().await?;
    for (side, price, qty) in &levels {
        let order = Order {
            id: ids::generate(),
            user_id: mm.maker_id.clone(),
            symbol: symbol.to_string(),
            order_type: OrderType::Limit,
            side: *side,
            price: *price,
            quantity: *qty,
            filled_qty: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };
        orders::insert(&mut conn, &order).await?;
    }
    drop(conn);

    publish_virtual_book(mm, symbol, &levels);

    tracing::debug!(
        symbol,
        price = %last_price,
        levels = levels.len(),
        adj = %adj,
        "virtual book refreshed"
    );
    Ok(())
}

fn publish_virtual_book(mm: &MarketMaker, symbol: &str, levels: &[QuoteLevel]) {
    let mut bids: Vec<(Decimal, Decimal)> = levels
        .iter()
        .filter(|(side, _, _)| *side == Side::Buy)
        .map(|(_, p, q)| (*p, *q))
        .collect();
    let mut asks: Vec<(Decimal, Decimal)> = levels
        .iter()
        .filter(|(side, _, _)| *side == Side::Sell)
        .map(|(_, p, q)| (*p, *q))
        .collect();
    bids.sort_by(|a, b| b.0.cmp(&a.0));
    asks.sort_by(|a, b| a.0.cmp(&b.0));

    let to_msg = |(p, q): &(Decimal, Decimal)| LevelMsg {
        price: p.to_string(),
        quantity: q.to_string(),
    };
    mm.events.publish(ExchangeEvent::OrderBook {
        symbol: symbol.to_string(),
        bids: bids.iter().map(to_msg).collect(),
        asks: asks.iter().map(to_msg).collect(),
    });
}

/// Print one synthetic tape trade near the last price, shaped by the
/// pair's volatility and activity.
async fn print_synthetic_trade(mm: &MarketMaker, pair: &TradingPair) -> CoreResult<()> {
    let symbol = pair.symbol.as_str();
    let Some(last_price) = trades::last_price(&mm.pool, symbol).await? else {
        return Ok(());
    };
    if last_price <= Decimal::ZERO {
        return Ok(());
    }

    let volatility = if pair.price_volatility > Decimal::ZERO {
        pair.price_volatility
    } else {
        Decimal::new(1, 2)
    };
    let level = pair.activity_level.clamp(1, 10);

    let (price, qty, side) = {
        let mut rng = rand::thread_rng();

        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        // Max move widens with activity: vol * level * 0.1
        let max_move = volatility
            * Decimal::from(level)
            * Decimal::new(1, 1)
            * Decimal::from_f64(rng.gen_range(0.0..1.0)).unwrap_or_default();
        let nudge = volatility * Decimal::new(1, 1) + max_move;
        let price = match side {
            Side::Buy => last_price * (Decimal::ONE + nudge),
            Side::Sell => last_price * (Decimal::ONE - nudge),
        };
        let price = precision::round_price(price);

        let (lo, hi) = precision::qty_range_for_price(last_price);
        let volume_factor = 0.3 + 0.17 * level as f64;
        let scale = Decimal::from_f64(
            volume_factor + rng.gen_range(0.0..1.0) * volume_factor,
        )
        .unwrap_or(Decimal::ONE);
        let base =
            lo + (hi - lo) * Decimal::from_f64(rng.gen_range(0.0..1.0)).unwrap_or_default();
        let qty = precision::round_qty(base * scale, price);

        (price, qty, side)
    };

    if price <= Decimal::ZERO || qty <= Decimal::ZERO {
        return Ok(());
    }

    insert_synthetic_trade(mm, symbol, price, qty, side).await
}

/// Persist a tape print backed by no real orders. These never travel the
/// settlement channel, so they settle nothing.
pub(crate) async fn insert_synthetic_trade(
    mm: &MarketMaker,
    symbol: &str,
    price: Decimal,
    qty: Decimal,
    side: Side,
) -> CoreResult<()> {
    let trade = Trade {
        id: ids::generate(),
        symbol: symbol.to_string(),
        buy_order_id: format!("virtual-buy-{}", symbol),
        sell_order_id: format!("virtual-sell-{}", symbol),
        price,
        quantity: qty,
        created_at: Utc::now(),
    };

    let mut conn = mm.pool.acquire().await?;
    trades::insert(&mut conn, &trade).await?;
    drop(conn);

    mm.events
        .publish_trade(symbol, price, qty, side, trade.created_at);
    Ok(())
}

/// Loop B entry: one task per active symbol.
pub(super) async fn quoting_loop(
    mm: Arc<MarketMaker>,
    symbol: String,
    mut reload_rx: mpsc::Receiver<()>,
) {
    'refresh: loop {
        if !mm.is_active(&symbol).await {
            break;
        }

        // Re-read the pair so each cycle quotes against live tunables
        let pair = match pairs::get_by_symbol(&mm.pool, &symbol).await {
            Ok(Some(pair)) if pair.simulator_enabled => pair,
            Ok(_) => break,
            Err(err) => {
                tracing::warn!(symbol = %symbol, error = %err, "pair reload failed");
                sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if let Err(err) = refresh_symbol(&mm, &pair).await {
            tracing::warn!(symbol = %symbol, error = %err, "virtual book refresh failed");
        }

        let refresh_after = Duration::from_secs(refresh_interval_secs(pair.activity_level));
        let tick_after = {
            let mut rng = rand::thread_rng();
            Duration::from_secs_f64(trade_tick_secs(pair.trade_frequency, &mut rng))
        };

        let refresh_sleep = sleep(refresh_after);
        tokio::pin!(refresh_sleep);
        let tick_sleep = sleep(tick_after);
        tokio::pin!(tick_sleep);

        loop {
            tokio::select! {
                _ = &mut refresh_sleep => continue 'refresh,
                _ = reload_rx.recv() => {
                    tracing::debug!(symbol = %symbol, "tunables reloaded");
                    continue 'refresh;
                }
                _ = &mut tick_sleep => {
                    if !mm.is_active(&symbol).await {
                        break;
                    }
                    if let Err(err) = print_synthetic_trade(&mm, &pair).await {
                        tracing::warn!(symbol = %symbol, error = %err, "synthetic trade failed");
                    }
                    let next = {
                        let mut rng = rand::thread_rng();
                        Duration::from_secs_f64(trade_tick_secs(pair.trade_frequency, &mut rng))
                    };
                    tick_sleep.as_mut().reset(Instant::now() + next);
                }
            }
        }
    }

    // Disabled (or pair gone): take the display depth with us
    if let Err(err) = mm.purge_virtual_orders(&symbol).await {
        tracing::warn!(symbol = %symbol, error = %err, "purge on shutdown failed");
    }
    tracing::info!(symbol = %symbol, "quoting task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PairStatus;
    use rust_decimal_macros::dec;

    fn pair(activity: i32, depth: i32, volatility: Decimal, spread: Decimal) -> TradingPair {
        TradingPair {
            id: "p".into(),
            symbol: "NOVA/USDT".into(),
            base_asset: "NOVA".into(),
            quote_asset: "USDT".into(),
            min_price: dec!(0.00000001),
            max_price: dec!(1000000),
            min_qty: dec!(0.0001),
            max_qty: dec!(1000000),
            status: PairStatus::Active,
            simulator_enabled: true,
            activity_level: activity,
            orderbook_depth: depth,
            trade_frequency: 20,
            price_volatility: volatility,
            virtual_trade_per_10s: 10,
            price_spread_ratio: spread,
        }
    }

    #[test]
    fn test_refresh_interval_by_activity() {
        assert_eq!(refresh_interval_secs(1), 20);
        assert_eq!(refresh_interval_secs(5), 12);
        assert_eq!(refresh_interval_secs(8), 6);
        assert_eq!(refresh_interval_secs(9), 1);
        assert_eq!(refresh_interval_secs(10), 1);
        // Out-of-range levels clamp
        assert_eq!(refresh_interval_secs(0), 20);
        assert_eq!(refresh_interval_secs(99), 1);
    }

    #[test]
    fn test_trade_tick_within_envelope() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let secs = trade_tick_secs(20, &mut rng);
            assert!((14.0..26.0).contains(&secs));
        }
        // Clamped frequency
        let secs = trade_tick_secs(1, &mut rng);
        assert!((3.5..6.5).contains(&secs));
    }

    #[test]
    fn test_ladder_shape_mid_activity() {
        // activity 5, depth 10, volatility 0.01, spread ratio 1.0, P = 100:
        // 10 bids in (99.00, 100.00) and 10 asks in (100.00, 101.00)
        let pair = pair(5, 10, dec!(0.01), dec!(1.0));
        let mut rng = rand::thread_rng();
        let levels = ladder(&pair, dec!(100), Decimal::ZERO, &mut rng);

        let bids: Vec<_> = levels.iter().filter(|(s, _, _)| *s == Side::Buy).collect();
        let asks: Vec<_> = levels.iter().filter(|(s, _, _)| *s == Side::Sell).collect();
        assert_eq!(bids.len(), 10);
        assert_eq!(asks.len(), 10);

        for (_, price, qty) in &bids {
            assert!(*price >= dec!(99.0) && *price < dec!(100));
            assert!(*qty > Decimal::ZERO);
        }
        for (_, price, qty) in &asks {
            assert!(*price > dec!(100) && *price <= dec!(101.0));
            assert!(*qty > Decimal::ZERO);
        }

        // Deeper levels sit further from the midpoint
        assert!(bids.last().unwrap().1 < bids.first().unwrap().1);
        assert!(asks.last().unwrap().1 > asks.first().unwrap().1);
    }

    #[test]
    fn test_ladder_applies_adjustment() {
        // adj = -0.03 shifts the whole ladder down ~3%
        let pair = pair(5, 10, dec!(0.01), dec!(1.0));
        let mut rng = rand::thread_rng();
        let shifted = ladder(&pair, dec!(100), dec!(-0.03), &mut rng);

        let best_ask = shifted
            .iter()
            .filter(|(s, _, _)| *s == Side::Sell)
            .map(|(_, p, _)| *p)
            .min()
            .unwrap();
        // Without adj the best ask is ~100.1; with -3% it lands near 97.1
        assert!(best_ask < dec!(98));
    }

    #[test]
    fn test_ladder_prices_are_display_rounded() {
        let pair = pair(5, 10, dec!(0.01), dec!(1.0));
        let mut rng = rand::thread_rng();
        for (_, price, _) in ladder(&pair, dec!(100), Decimal::ZERO, &mut rng) {
            assert_eq!(price, precision::round_price(price));
        }
    }

    #[test]
    fn test_ladder_clamps_depth() {
        let pair = pair(5, 200, dec!(0.01), dec!(1.0));
        let mut rng = rand::thread_rng();
        let levels = ladder(&pair, dec!(100), Decimal::ZERO, &mut rng);
        assert_eq!(levels.len(), 60); // 30 per side
    }
}
