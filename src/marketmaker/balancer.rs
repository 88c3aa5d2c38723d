//! Loop D - inventory balancer
//!
//! Every 30 s the balancer measures the maker's realized flow over the
//! last five minutes. Heavy selling means the maker is piling up quote
//! and shedding base, so it drops its quoted midpoint to attract sellers;
//! heavy buying raises it. A large shift re-quotes immediately instead of
//! waiting for the next scheduled refresh.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::persistence::pnl;

use super::{quoting, MarketMaker};

const BALANCE_INTERVAL: Duration = Duration::from_secs(30);
const SKEW_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

/// Shift threshold that triggers an immediate re-quote.
const REQUOTE_THRESHOLD: Decimal = dec!(0.02);

/// Map the observed side counts to a price-adjustment coefficient.
/// Returns None when there was no flow (the old adjustment stands).
pub fn compute_adjustment(buy_count: i64, sell_count: i64) -> Option<Decimal> {
    let total = buy_count + sell_count;
    if total == 0 {
        return None;
    }

    let sell_ratio = sell_count as f64 / total as f64;
    let buy_ratio = buy_count as f64 / total as f64;

    Some(if sell_ratio > 0.7 {
        dec!(-0.03)
    } else if sell_ratio > 0.6 {
        dec!(-0.01)
    } else if buy_ratio > 0.7 {
        dec!(0.03)
    } else if buy_ratio > 0.6 {
        dec!(0.01)
    } else {
        Decimal::ZERO
    })
}

/// Loop D entry.
pub(super) async fn balancer_loop(mm: Arc<MarketMaker>) {
    let mut ticker = interval(BALANCE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        for symbol in mm.active_symbols().await {
            if let Err(err) = rebalance_symbol(&mm, &symbol).await {
                tracing::warn!(symbol = %symbol, error = %err, "rebalance failed");
            }
        }
    }
}

async fn rebalance_symbol(mm: &MarketMaker, symbol: &str) -> crate::error::CoreResult<()> {
    let since = Utc::now() - SKEW_WINDOW;
    let (buys, sells) = pnl::side_counts_since(&mm.pool, symbol, since).await?;

    let Some(new_adj) = compute_adjustment(buys, sells) else {
        return Ok(());
    };

    let old_adj = mm.adjustment_for(symbol).await;
    mm.set_adjustment(symbol, new_adj).await;

    if new_adj != old_adj {
        tracing::info!(
            symbol,
            buys,
            sells,
            old = %old_adj,
            new = %new_adj,
            "price adjustment updated"
        );
    }

    // Big shift: refresh now rather than on the next quoting tick
    if (new_adj - old_adj).abs() >= REQUOTE_THRESHOLD {
        if let Some(pair) = mm.config_for(symbol).await {
            quoting::refresh_symbol(mm, &pair).await?;
            tracing::info!(symbol, adj = %new_adj, "virtual book re-quoted after skew shift");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flow_keeps_old_adjustment() {
        assert_eq!(compute_adjustment(0, 0), None);
    }

    #[test]
    fn test_heavy_selling_drops_quotes_hard() {
        // 8 maker sells vs 2 buys: 80% sell ratio -> -3%
        assert_eq!(compute_adjustment(2, 8), Some(dec!(-0.03)));
    }

    #[test]
    fn test_mild_selling_drops_quotes_gently() {
        // 65% sell ratio -> -1%
        assert_eq!(compute_adjustment(35, 65), Some(dec!(-0.01)));
    }

    #[test]
    fn test_heavy_buying_raises_quotes_hard() {
        assert_eq!(compute_adjustment(8, 2), Some(dec!(0.03)));
    }

    #[test]
    fn test_mild_buying_raises_quotes_gently() {
        assert_eq!(compute_adjustment(65, 35), Some(dec!(0.01)));
    }

    #[test]
    fn test_balanced_flow_is_neutral() {
        assert_eq!(compute_adjustment(5, 5), Some(Decimal::ZERO));
        assert_eq!(compute_adjustment(55, 45), Some(Decimal::ZERO));
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        // Exactly 70% is not "over 0.7"
        assert_eq!(compute_adjustment(3, 7), Some(dec!(-0.01)));
        // Exactly 60% is not "over 0.6"
        assert_eq!(compute_adjustment(4, 6), Some(Decimal::ZERO));
    }
}
