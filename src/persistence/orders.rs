//! Order repository
//!
//! Besides plain CRUD this module carries the queries the market-making
//! controller leans on: real open orders per side, virtual open orders for
//! the display book, best virtual quotes, and the `FOR UPDATE` re-read the
//! taker loop uses before amending a real order.

use std::collections::HashMap;

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::CoreResult;
use crate::models::{Order, OrderStatus, OrderType, Side, UserKind};

const ORDER_COLUMNS: &str =
    "id, user_id, symbol, order_type, side, price, quantity, filled_qty, status, created_at";

fn order_from_row(row: &PgRow) -> Order {
    Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        symbol: row.get("symbol"),
        order_type: OrderType::parse(&row.get::<String, _>("order_type"))
            .unwrap_or(OrderType::Limit),
        side: Side::parse(&row.get::<String, _>("side")).unwrap_or(Side::Buy),
        price: row.get("price"),
        quantity: row.get("quantity"),
        filled_qty: row.get("filled_qty"),
        status: OrderStatus::parse(&row.get::<String, _>("status"))
            .unwrap_or(OrderStatus::Pending),
        created_at: row.get("created_at"),
    }
}

pub async fn insert(conn: &mut PgConnection, order: &Order) -> CoreResult<()> {
    sqlx::query(
        r#"INSERT INTO orders
               (id, user_id, symbol, order_type, side, price, quantity, filled_qty, status, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
    )
    .bind(&order.id)
    .bind(&order.user_id)
    .bind(&order.symbol)
    .bind(order.order_type.as_str())
    .bind(order.side.as_str())
    .bind(order.price)
    .bind(order.quantity)
    .bind(order.filled_qty)
    .bind(order.status.as_str())
    .bind(order.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_by_id(pool: &PgPool, order_id: &str) -> CoreResult<Option<Order>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM orders WHERE id = $1",
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(order_from_row))
}

/// Re-read an order under its row lock. The taker loop and cancel path use
/// this so concurrent fill progress is never lost.
pub async fn lock_for_update(
    conn: &mut PgConnection,
    order_id: &str,
) -> CoreResult<Option<Order>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(conn)
    .await?;

    Ok(row.as_ref().map(order_from_row))
}

/// Bulk-fetch orders into an id-keyed map.
pub async fn fetch_by_ids(pool: &PgPool, ids: &[String]) -> CoreResult<HashMap<String, Order>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query(&format!(
        "SELECT {} FROM orders WHERE id = ANY($1)",
        ORDER_COLUMNS
    ))
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let order = order_from_row(row);
            (order.id.clone(), order)
        })
        .collect())
}

pub async fn update_fill(
    conn: &mut PgConnection,
    order_id: &str,
    filled_qty: rust_decimal::Decimal,
    status: OrderStatus,
) -> CoreResult<()> {
    sqlx::query(
        r#"UPDATE orders SET filled_qty = $2, status = $3, updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(order_id)
    .bind(filled_qty)
    .bind(status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn update_status(
    conn: &mut PgConnection,
    order_id: &str,
    status: OrderStatus,
) -> CoreResult<()> {
    sqlx::query(r#"UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1"#)
        .bind(order_id)
        .bind(status.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

/// A user's orders, newest first, optionally filtered.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: &str,
    symbol: Option<&str>,
    status: Option<OrderStatus>,
    limit: i64,
) -> CoreResult<Vec<Order>> {
    let rows = sqlx::query(&format!(
        r#"SELECT {} FROM orders
           WHERE user_id = $1
             AND ($2::TEXT IS NULL OR symbol = $2)
             AND ($3::TEXT IS NULL OR status = $3)
           ORDER BY created_at DESC
           LIMIT $4"#,
        ORDER_COLUMNS
    ))
    .bind(user_id)
    .bind(symbol)
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(order_from_row).collect())
}

/// Open orders of real users on one side of a symbol, best price first.
/// This is the taker loop's working set; the virtual maker's own rows are
/// excluded through the user kind flag.
pub async fn open_real_orders(
    pool: &PgPool,
    symbol: &str,
    side: Side,
) -> CoreResult<Vec<Order>> {
    let order_clause = match side {
        Side::Buy => "o.price DESC",
        Side::Sell => "o.price ASC",
    };

    let rows = sqlx::query(&format!(
        r#"SELECT o.id, o.user_id, o.symbol, o.order_type, o.side, o.price,
                  o.quantity, o.filled_qty, o.status, o.created_at
           FROM orders o
           JOIN users u ON u.id = o.user_id
           WHERE o.symbol = $1 AND o.side = $2
             AND o.status IN ('pending', 'partial')
             AND u.kind = $3
           ORDER BY {}"#,
        order_clause
    ))
    .bind(symbol)
    .bind(side.as_str())
    .bind(UserKind::Real.as_i16())
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(order_from_row).collect())
}

/// All open orders of real users across every symbol, oldest first. Feeds
/// the book rebuild at startup.
pub async fn open_real_orders_all(pool: &PgPool) -> CoreResult<Vec<Order>> {
    let rows = sqlx::query(
        r#"SELECT o.id, o.user_id, o.symbol, o.order_type, o.side, o.price,
                  o.quantity, o.filled_qty, o.status, o.created_at
           FROM orders o
           JOIN users u ON u.id = o.user_id
           WHERE o.status IN ('pending', 'partial') AND u.kind = $1
           ORDER BY o.created_at ASC"#,
    )
    .bind(UserKind::Real.as_i16())
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(order_from_row).collect())
}

/// The virtual maker's open display orders on one side, best price first.
pub async fn virtual_open_orders(
    pool: &PgPool,
    symbol: &str,
    maker_id: &str,
    side: Side,
    limit: i64,
) -> CoreResult<Vec<Order>> {
    let order_clause = match side {
        Side::Buy => "price DESC",
        Side::Sell => "price ASC",
    };

    let rows = sqlx::query(&format!(
        r#"SELECT {} FROM orders
           WHERE symbol = $1 AND user_id = $2 AND side = $3 AND status = 'pending'
           ORDER BY {} LIMIT $4"#,
        ORDER_COLUMNS, order_clause
    ))
    .bind(symbol)
    .bind(maker_id)
    .bind(side.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(order_from_row).collect())
}

/// Best virtual quote on one side: lowest ask or highest bid.
pub async fn best_virtual_quote(
    pool: &PgPool,
    symbol: &str,
    maker_id: &str,
    side: Side,
) -> CoreResult<Option<Order>> {
    Ok(virtual_open_orders(pool, symbol, maker_id, side, 1)
        .await?
        .into_iter()
        .next())
}

/// Delete every open virtual order for a symbol. Quoting refresh and the
/// controller shutdown path both run this.
pub async fn delete_virtual_open(
    pool: &PgPool,
    symbol: &str,
    maker_id: &str,
) -> CoreResult<u64> {
    let result = sqlx::query(
        r#"DELETE FROM orders
           WHERE user_id = $1 AND symbol = $2 AND status IN ('pending', 'partial')"#,
    )
    .bind(maker_id)
    .bind(symbol)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
