//! HTTP handlers

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::{Order, OrderStatus, OrderType, Side};
use crate::service::SubmitOrderRequest;

use super::error::ApiError;
use super::AppState;

/// Caller identity, established upstream by the auth collaborator.
fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("missing X-User-Id header"))
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw)
        .map_err(|_| ApiError::bad_request(format!("invalid {}: {}", field, raw)))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================
// ORDERS
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub symbol: String,
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub price: Option<String>,
    pub quantity: String,
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderBody>,
) -> Result<Json<Order>, ApiError> {
    let user = user_id(&headers)?;

    let order_type = OrderType::parse(&body.order_type)
        .ok_or_else(|| ApiError::bad_request(format!("invalid order_type: {}", body.order_type)))?;
    let side = Side::parse(&body.side)
        .ok_or_else(|| ApiError::bad_request(format!("invalid side: {}", body.side)))?;
    let price = body
        .price
        .as_deref()
        .map(|raw| parse_decimal(raw, "price"))
        .transpose()?;
    let quantity = parse_decimal(&body.quantity, "quantity")?;

    let order = state
        .orders
        .submit(
            &user,
            SubmitOrderRequest {
                symbol: body.symbol,
                order_type,
                side,
                price,
                quantity,
            },
        )
        .await?;

    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let order = state.orders.cancel(&user, &order_id).await?;
    let cancelled_qty = order.remaining_qty();

    Ok(Json(json!({
        "order": order,
        "message": "Order cancelled successfully",
        "filled_qty": order.filled_qty.to_string(),
        "cancelled_qty": cancelled_qty.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub symbol: Option<String>,
    pub status: Option<String>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let user = user_id(&headers)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            OrderStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("invalid status: {}", raw)))?,
        ),
        None => None,
    };

    let orders = state
        .orders
        .list(&user, query.symbol.as_deref(), status)
        .await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let user = user_id(&headers)?;
    let order = state.orders.get(&user, &order_id).await?;
    Ok(Json(order))
}

// ============================================================
// MARKET DATA
// ============================================================

#[derive(Debug, Deserialize)]
pub struct BookQuery {
    pub symbol: String,
    pub depth: Option<usize>,
}

pub async fn order_book(
    State(state): State<AppState>,
    Query(query): Query<BookQuery>,
) -> Result<Json<crate::models::OrderBookView>, ApiError> {
    let book = state
        .market
        .order_book(&query.symbol, query.depth.unwrap_or(20))
        .await?;
    Ok(Json(book))
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    pub symbol: String,
}

pub async fn ticker(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<crate::models::Ticker>, ApiError> {
    let ticker = state.market.ticker(&query.symbol).await?;
    Ok(Json(ticker))
}

pub async fn all_tickers(
    State(state): State<AppState>,
) -> Result<Json<Vec<crate::models::Ticker>>, ApiError> {
    let tickers = state.market.all_tickers().await?;
    Ok(Json(tickers))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub symbol: String,
    pub limit: Option<i64>,
}

pub async fn recent_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<crate::models::Trade>>, ApiError> {
    let trades = state
        .market
        .recent_trades(&query.symbol, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(trades))
}

// ============================================================
// BALANCES
// ============================================================

pub async fn balances(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::models::Balance>>, ApiError> {
    let user = user_id(&headers)?;
    let balances = state.ledger.list(&user).await?;
    Ok(Json(balances))
}
