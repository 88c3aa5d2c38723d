//! Trading pair repository

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::CoreResult;
use crate::models::{PairStatus, TradingPair};

const PAIR_COLUMNS: &str = r#"id, symbol, base_asset, quote_asset,
    min_price, max_price, min_qty, max_qty, status, simulator_enabled,
    activity_level, orderbook_depth, trade_frequency, price_volatility,
    virtual_trade_per_10s, price_spread_ratio"#;

fn pair_from_row(row: &PgRow) -> TradingPair {
    TradingPair {
        id: row.get("id"),
        symbol: row.get("symbol"),
        base_asset: row.get("base_asset"),
        quote_asset: row.get("quote_asset"),
        min_price: row.get("min_price"),
        max_price: row.get("max_price"),
        min_qty: row.get("min_qty"),
        max_qty: row.get("max_qty"),
        status: PairStatus::parse(&row.get::<String, _>("status"))
            .unwrap_or(PairStatus::Inactive),
        simulator_enabled: row.get("simulator_enabled"),
        activity_level: row.get("activity_level"),
        orderbook_depth: row.get("orderbook_depth"),
        trade_frequency: row.get("trade_frequency"),
        price_volatility: row.get("price_volatility"),
        virtual_trade_per_10s: row.get("virtual_trade_per_10s"),
        price_spread_ratio: row.get("price_spread_ratio"),
    }
}

pub async fn get_by_symbol(pool: &PgPool, symbol: &str) -> CoreResult<Option<TradingPair>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM trading_pairs WHERE symbol = $1",
        PAIR_COLUMNS
    ))
    .bind(symbol)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(pair_from_row))
}

pub async fn list_active(pool: &PgPool) -> CoreResult<Vec<TradingPair>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM trading_pairs WHERE status = 'active' ORDER BY symbol",
        PAIR_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(pair_from_row).collect())
}

/// Pairs the market-making controller serves: active and simulator-enabled.
pub async fn list_simulated(pool: &PgPool) -> CoreResult<Vec<TradingPair>> {
    let rows = sqlx::query(&format!(
        r#"SELECT {} FROM trading_pairs
           WHERE simulator_enabled = TRUE AND status = 'active'
           ORDER BY symbol"#,
        PAIR_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(pair_from_row).collect())
}

/// Insert a pair if its symbol is new. Used by seeds and tests.
pub async fn upsert(pool: &PgPool, pair: &TradingPair) -> CoreResult<()> {
    sqlx::query(
        r#"INSERT INTO trading_pairs
               (id, symbol, base_asset, quote_asset, min_price, max_price,
                min_qty, max_qty, status, simulator_enabled, activity_level,
                orderbook_depth, trade_frequency, price_volatility,
                virtual_trade_per_10s, price_spread_ratio)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
           ON CONFLICT (symbol) DO UPDATE SET
               status = EXCLUDED.status,
               simulator_enabled = EXCLUDED.simulator_enabled,
               activity_level = EXCLUDED.activity_level,
               orderbook_depth = EXCLUDED.orderbook_depth,
               trade_frequency = EXCLUDED.trade_frequency,
               price_volatility = EXCLUDED.price_volatility,
               virtual_trade_per_10s = EXCLUDED.virtual_trade_per_10s,
               price_spread_ratio = EXCLUDED.price_spread_ratio,
               updated_at = NOW()"#,
    )
    .bind(&pair.id)
    .bind(&pair.symbol)
    .bind(&pair.base_asset)
    .bind(&pair.quote_asset)
    .bind(pair.min_price)
    .bind(pair.max_price)
    .bind(pair.min_qty)
    .bind(pair.max_qty)
    .bind(pair.status.as_str())
    .bind(pair.simulator_enabled)
    .bind(pair.activity_level)
    .bind(pair.orderbook_depth)
    .bind(pair.trade_frequency)
    .bind(pair.price_volatility)
    .bind(pair.virtual_trade_per_10s)
    .bind(pair.price_spread_ratio)
    .execute(pool)
    .await?;

    Ok(())
}
