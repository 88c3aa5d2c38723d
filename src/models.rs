//! Core domain types: users, pairs, balances, orders, trades, fees
//!
//! All monetary fields are `rust_decimal::Decimal`; the DB stores them as
//! NUMERIC. Enum-like columns are stored as their lowercase string form
//! except `UserKind`, which is a small integer flag.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================
// ENUMS
// ============================================================

/// Order side: Buy or Sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }

    pub fn parse(s: &str) -> Option<OrderType> {
        match s {
            "limit" => Some(OrderType::Limit),
            "market" => Some(OrderType::Market),
            _ => None,
        }
    }
}

/// Order status lifecycle
///
/// `pending -> partial -> filled`, with `cancelled` / `partial_cancelled`
/// as the user-initiated terminal states. A terminal status never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    PartialCancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::PartialCancelled => "partial_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "partial" => Some(OrderStatus::Partial),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            "partial_cancelled" => Some(OrderStatus::PartialCancelled),
            _ => None,
        }
    }

    /// Still resting on the book (cancellable, fillable).
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Partial)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::PartialCancelled
        )
    }
}

/// User kind flag. The settlement pipeline's virtual-maker filter and the
/// controller's "real orders only" queries read this flag; nothing in the
/// core compares wallet address strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Real,
    VirtualMaker,
}

impl From<i16> for UserKind {
    fn from(v: i16) -> Self {
        match v {
            1 => UserKind::VirtualMaker,
            _ => UserKind::Real,
        }
    }
}

impl UserKind {
    pub fn as_i16(&self) -> i16 {
        match self {
            UserKind::Real => 0,
            UserKind::VirtualMaker => 1,
        }
    }
}

/// Fee tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    Normal,
    Vip1,
    Vip2,
    Vip3,
}

impl UserLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserLevel::Normal => "normal",
            UserLevel::Vip1 => "vip1",
            UserLevel::Vip2 => "vip2",
            UserLevel::Vip3 => "vip3",
        }
    }

    pub fn parse(s: &str) -> Option<UserLevel> {
        match s {
            "normal" => Some(UserLevel::Normal),
            "vip1" => Some(UserLevel::Vip1),
            "vip2" => Some(UserLevel::Vip2),
            "vip3" => Some(UserLevel::Vip3),
            _ => None,
        }
    }
}

/// Fill role for fee records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeRole {
    Maker,
    Taker,
}

impl FeeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeRole::Maker => "maker",
            FeeRole::Taker => "taker",
        }
    }
}

/// Trading pair status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStatus {
    Active,
    Inactive,
}

impl PairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairStatus::Active => "active",
            PairStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<PairStatus> {
        match s {
            "active" => Some(PairStatus::Active),
            "inactive" => Some(PairStatus::Inactive),
            _ => None,
        }
    }
}

// ============================================================
// ENTITIES
// ============================================================

/// Exchange user. Created on first login-nonce request by the auth layer;
/// the virtual maker is created at bootstrap with `kind = VirtualMaker`.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub wallet_address: String,
    pub kind: UserKind,
    pub user_level: UserLevel,
    #[serde(skip_serializing)]
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

/// Trading pair with the six simulator tunables at the tail.
#[derive(Debug, Clone, Serialize)]
pub struct TradingPair {
    pub id: String,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub status: PairStatus,
    pub simulator_enabled: bool,
    pub activity_level: i32,
    pub orderbook_depth: i32,
    pub trade_frequency: i32,
    pub price_volatility: Decimal,
    pub virtual_trade_per_10s: i32,
    pub price_spread_ratio: Decimal,
}

impl TradingPair {
    /// Whether the simulator tunables differ between two snapshots of the
    /// same pair. Drives the hot-reload notification.
    pub fn tunables_changed(&self, other: &TradingPair) -> bool {
        self.activity_level != other.activity_level
            || self.orderbook_depth != other.orderbook_depth
            || self.trade_frequency != other.trade_frequency
            || self.virtual_trade_per_10s != other.virtual_trade_per_10s
            || self.price_volatility != other.price_volatility
            || self.price_spread_ratio != other.price_spread_ratio
    }
}

/// Split "BASE/QUOTE" into its two assets.
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

/// Per-user, per-asset balance row, unique on `(user_id, asset)`.
///
/// Invariant: `available >= 0 && frozen >= 0` at every externally
/// observable instant. Every mutation in the ledger is a guarded UPDATE.
#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub user_id: String,
    pub asset: String,
    pub available: Decimal,
    pub frozen: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.available + self.frozen
    }
}

/// An order, from submission until a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_qty: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn remaining_qty(&self) -> Decimal {
        self.quantity - self.filled_qty
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.filled_qty >= self.quantity
    }
}

/// A fill between two orders. Immutable once written.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Fee rates for a user level.
#[derive(Debug, Clone, Serialize)]
pub struct FeeConfig {
    pub user_level: UserLevel,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
}

/// One fee record per side per fill.
#[derive(Debug, Clone, Serialize)]
pub struct FeeRecord {
    pub id: String,
    pub user_id: String,
    pub order_id: String,
    pub trade_id: String,
    pub asset: String,
    pub amount: Decimal,
    pub fee_rate: Decimal,
    pub role: FeeRole,
}

/// Realized-PnL ledger row for the virtual maker, one per aggressive fill.
#[derive(Debug, Clone, Serialize)]
pub struct MarketMakerPnl {
    pub id: String,
    pub symbol: String,
    pub trade_id: String,
    pub side: Side,
    pub execute_price: Decimal,
    pub market_price: Decimal,
    pub quantity: Decimal,
    pub profit_loss: Decimal,
    pub profit_percent: Decimal,
    pub created_at: DateTime<Utc>,
}

/// 24-hour rolling market summary, derived from trades on demand.
#[derive(Debug, Clone, Serialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub change_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// One aggregated price level of an order book view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Depth-N order book view, bids descending and asks ascending, aggregated
/// at display precision.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookView {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_split_symbol() {
        assert_eq!(split_symbol("BTC/USDT"), Some(("BTC", "USDT")));
        assert_eq!(split_symbol("NOSLASH"), None);
        assert_eq!(split_symbol("/USDT"), None);
        assert_eq!(split_symbol("BTC/"), None);
    }

    #[test]
    fn test_status_lifecycle_flags() {
        assert!(OrderStatus::Pending.is_open());
        assert!(OrderStatus::Partial.is_open());
        assert!(!OrderStatus::Filled.is_open());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::PartialCancelled.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Partial,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::PartialCancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_user_kind_from_i16() {
        assert_eq!(UserKind::from(0i16), UserKind::Real);
        assert_eq!(UserKind::from(1i16), UserKind::VirtualMaker);
        assert_eq!(UserKind::from(42i16), UserKind::Real);
    }

    #[test]
    fn test_order_remaining() {
        let order = Order {
            id: "a".into(),
            user_id: "u".into(),
            symbol: "BTC/USDT".into(),
            order_type: OrderType::Limit,
            side: Side::Buy,
            price: dec!(100),
            quantity: dec!(5),
            filled_qty: dec!(2),
            status: OrderStatus::Partial,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(order.remaining_qty(), dec!(3));
        assert!(!order.is_filled());
    }

    #[test]
    fn test_tunables_changed() {
        let pair = TradingPair {
            id: "p".into(),
            symbol: "BTC/USDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            min_price: dec!(0.00000001),
            max_price: dec!(1000000),
            min_qty: dec!(0.0001),
            max_qty: dec!(10000),
            status: PairStatus::Active,
            simulator_enabled: true,
            activity_level: 5,
            orderbook_depth: 15,
            trade_frequency: 20,
            price_volatility: dec!(0.01),
            virtual_trade_per_10s: 10,
            price_spread_ratio: dec!(1.0),
        };
        let mut other = pair.clone();
        assert!(!pair.tunables_changed(&other));
        other.activity_level = 9;
        assert!(pair.tunables_changed(&other));
    }
}
