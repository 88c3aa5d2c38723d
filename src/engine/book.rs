//! Price-time priority book for one symbol
//!
//! Each side is a map of FIFO price levels: better price first, earlier
//! arrival first within a level. Bids iterate descending, asks ascending.
//! Market orders live in the same structure under a sentinel price
//! (`Decimal::MAX` for buys, zero for sells) so they sort ahead of every
//! limit order on their side; the match loop treats them specially when
//! picking the trade price.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{BookLevel, Order, OrderType, Side};
use crate::precision;

/// An order as the book holds it. A trimmed copy of the persisted order;
/// `price` is the sentinel for market orders, `limit_price` keeps the
/// client's original value.
#[derive(Debug, Clone)]
pub struct BookOrder {
    pub id: String,
    pub user_id: String,
    pub order_type: OrderType,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_qty: Decimal,
    pub created_at: DateTime<Utc>,
}

impl BookOrder {
    pub fn from_order(order: &Order) -> Self {
        let price = match order.order_type {
            OrderType::Limit => order.price,
            OrderType::Market => match order.side {
                Side::Buy => Decimal::MAX,
                Side::Sell => Decimal::ZERO,
            },
        };
        Self {
            id: order.id.clone(),
            user_id: order.user_id.clone(),
            order_type: order.order_type,
            side: order.side,
            price,
            quantity: order.quantity,
            filled_qty: order.filled_qty,
            created_at: order.created_at,
        }
    }

    #[inline]
    pub fn remaining_qty(&self) -> Decimal {
        self.quantity - self.filled_qty
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.filled_qty >= self.quantity
    }
}

/// One matched fill, before it becomes a persisted Trade.
#[derive(Debug, Clone)]
pub struct Fill {
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// The two sides of one symbol's book.
#[derive(Debug, Default)]
pub struct Book {
    bids: BTreeMap<Decimal, VecDeque<BookOrder>>,
    asks: BTreeMap<Decimal, VecDeque<BookOrder>>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rest an order on its side without matching.
    pub fn rest(&mut self, order: BookOrder) {
        let side = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        side.entry(order.price).or_default().push_back(order);
    }

    /// Best bid price, ignoring market sentinels.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids
            .iter()
            .rev()
            .flat_map(|(_, level)| level.iter())
            .find(|o| o.order_type == OrderType::Limit)
            .map(|o| o.price)
    }

    /// Best ask price, ignoring market sentinels.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks
            .iter()
            .flat_map(|(_, level)| level.iter())
            .find(|o| o.order_type == OrderType::Limit)
            .map(|o| o.price)
    }

    /// Total resting orders on both sides.
    pub fn len(&self) -> usize {
        self.bids.values().map(VecDeque::len).sum::<usize>()
            + self.asks.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the continuous-matching loop until the tops no longer cross.
    ///
    /// Price rule: the trade prints at the ask price when the ask is a
    /// limit order, else at the bid price. Quantity is the smaller
    /// remaining side, exact decimal arithmetic, no rounding.
    pub fn match_crossing(&mut self) -> Vec<Fill> {
        let mut fills = Vec::new();

        loop {
            let bids = &mut self.bids;
            let asks = &mut self.asks;

            let Some((&bid_price, bid_level)) = bids.iter_mut().next_back() else {
                break;
            };
            let Some((&ask_price, ask_level)) = asks.iter_mut().next() else {
                break;
            };
            let Some(bid) = bid_level.front_mut() else {
                bids.remove(&bid_price);
                continue;
            };
            // Split borrow is per-map, so the two fronts coexist
            let ask = match ask_level.front_mut() {
                Some(ask) => ask,
                None => {
                    asks.remove(&ask_price);
                    continue;
                }
            };

            let crossed = bid.order_type == OrderType::Market
                || ask.order_type == OrderType::Market
                || bid.price >= ask.price;
            if !crossed {
                break;
            }

            let trade_price = if ask.order_type == OrderType::Limit {
                ask.price
            } else {
                bid.price
            };
            let qty = bid.remaining_qty().min(ask.remaining_qty());

            bid.filled_qty += qty;
            ask.filled_qty += qty;

            fills.push(Fill {
                buy_order_id: bid.id.clone(),
                sell_order_id: ask.id.clone(),
                price: trade_price,
                quantity: qty,
            });

            let bid_done = bid.is_filled();
            let ask_done = ask.is_filled();
            if bid_done {
                bid_level.pop_front();
                if bid_level.is_empty() {
                    bids.remove(&bid_price);
                }
            }
            if ask_done {
                ask_level.pop_front();
                if ask_level.is_empty() {
                    asks.remove(&ask_price);
                }
            }
        }

        fills
    }

    /// Remove an order by id from one side. O(n) over that side; the book
    /// is bounded by configured depth plus in-flight real orders, so the
    /// scan stays small.
    pub fn remove(&mut self, order_id: &str, side: Side) -> Option<BookOrder> {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };

        let mut found_at: Option<(Decimal, usize)> = None;
        for (&price, level) in levels.iter() {
            if let Some(pos) = level.iter().position(|o| o.id == order_id) {
                found_at = Some((price, pos));
                break;
            }
        }

        let (price, pos) = found_at?;
        let level = levels.get_mut(&price)?;
        let order = level.remove(pos);
        if level.is_empty() {
            levels.remove(&price);
        }
        order
    }

    /// Depth-N view with remaining quantities aggregated by price rounded
    /// to display precision; without the rounding, dust-level differences
    /// from the maker would show as meaningless extra levels. Market
    /// orders carry sentinel prices and are skipped.
    pub fn snapshot(&self, depth: usize) -> (Vec<BookLevel>, Vec<BookLevel>) {
        let precision = self
            .best_bid()
            .or_else(|| self.best_ask())
            .map(precision::price_precision)
            .unwrap_or(3);

        let mut bid_levels: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for order in self.bids.values().flatten() {
            if order.order_type != OrderType::Limit {
                continue;
            }
            let key = order.price.round_dp(precision);
            *bid_levels.entry(key).or_default() += order.remaining_qty();
        }

        let mut ask_levels: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for order in self.asks.values().flatten() {
            if order.order_type != OrderType::Limit {
                continue;
            }
            let key = order.price.round_dp(precision);
            *ask_levels.entry(key).or_default() += order.remaining_qty();
        }

        let bids = bid_levels
            .into_iter()
            .rev()
            .take(depth)
            .map(|(price, quantity)| BookLevel { price, quantity })
            .collect();
        let asks = ask_levels
            .into_iter()
            .take(depth)
            .map(|(price, quantity)| BookLevel { price, quantity })
            .collect();

        (bids, asks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(id: &str, side: Side, price: Decimal, qty: Decimal) -> BookOrder {
        BookOrder {
            id: id.to_string(),
            user_id: format!("user-{}", id),
            order_type: OrderType::Limit,
            side,
            price,
            quantity: qty,
            filled_qty: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    fn market(id: &str, side: Side, qty: Decimal) -> BookOrder {
        let price = match side {
            Side::Buy => Decimal::MAX,
            Side::Sell => Decimal::ZERO,
        };
        BookOrder {
            id: id.to_string(),
            user_id: format!("user-{}", id),
            order_type: OrderType::Market,
            side,
            price,
            quantity: qty,
            filled_qty: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_rest_no_cross_no_fill() {
        let mut book = Book::new();
        book.rest(limit("b1", Side::Buy, dec!(100), dec!(10)));
        book.rest(limit("a1", Side::Sell, dec!(102), dec!(10)));

        assert!(book.match_crossing().is_empty());
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.best_ask(), Some(dec!(102)));
    }

    #[test]
    fn test_full_match_at_ask_price() {
        let mut book = Book::new();
        book.rest(limit("a1", Side::Sell, dec!(100), dec!(10)));
        book.rest(limit("b1", Side::Buy, dec!(101), dec!(10)));

        let fills = book.match_crossing();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(100)); // ask price wins
        assert_eq!(fills[0].quantity, dec!(10));
        assert!(book.is_empty());
    }

    #[test]
    fn test_partial_fill_leaves_remainder() {
        let mut book = Book::new();
        book.rest(limit("a1", Side::Sell, dec!(100), dec!(10)));
        book.rest(limit("b1", Side::Buy, dec!(100), dec!(15)));

        let fills = book.match_crossing();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, dec!(10));
        // Buy remainder rests
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_price_priority_best_ask_first() {
        let mut book = Book::new();
        book.rest(limit("a1", Side::Sell, dec!(102), dec!(5)));
        book.rest(limit("a2", Side::Sell, dec!(100), dec!(5)));
        book.rest(limit("a3", Side::Sell, dec!(101), dec!(5)));
        book.rest(limit("b1", Side::Buy, dec!(102), dec!(12)));

        let fills = book.match_crossing();
        assert_eq!(fills.len(), 3);
        assert_eq!(fills[0].price, dec!(100));
        assert_eq!(fills[1].price, dec!(101));
        assert_eq!(fills[2].price, dec!(102));
        assert_eq!(fills[2].quantity, dec!(2));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut book = Book::new();
        book.rest(limit("a1", Side::Sell, dec!(100), dec!(5)));
        book.rest(limit("a2", Side::Sell, dec!(100), dec!(5)));
        book.rest(limit("b1", Side::Buy, dec!(100), dec!(3)));

        let fills = book.match_crossing();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].sell_order_id, "a1"); // earlier arrival first
    }

    #[test]
    fn test_market_buy_sweeps_best_price_first() {
        // Resting SELL 100 x5 and SELL 101 x5; market BUY 8 takes (100,5)
        // then (101,3)
        let mut book = Book::new();
        book.rest(limit("a1", Side::Sell, dec!(100), dec!(5)));
        book.rest(limit("a2", Side::Sell, dec!(101), dec!(5)));
        book.rest(market("m1", Side::Buy, dec!(8)));

        let fills = book.match_crossing();
        assert_eq!(fills.len(), 2);
        assert_eq!((fills[0].price, fills[0].quantity), (dec!(100), dec!(5)));
        assert_eq!((fills[1].price, fills[1].quantity), (dec!(101), dec!(3)));
        // The partially-filled ask keeps its remainder
        assert_eq!(book.best_ask(), Some(dec!(101)));
    }

    #[test]
    fn test_market_sell_prints_at_bid_price() {
        let mut book = Book::new();
        book.rest(limit("b1", Side::Buy, dec!(99), dec!(4)));
        book.rest(market("m1", Side::Sell, dec!(4)));

        let fills = book.match_crossing();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(99));
    }

    #[test]
    fn test_trade_price_bounded_by_both_limits() {
        let mut book = Book::new();
        book.rest(limit("a1", Side::Sell, dec!(100), dec!(5)));
        book.rest(limit("b1", Side::Buy, dec!(103), dec!(5)));

        let fills = book.match_crossing();
        assert_eq!(fills.len(), 1);
        assert!(fills[0].price >= dec!(100) && fills[0].price <= dec!(103));
    }

    #[test]
    fn test_remove_by_id() {
        let mut book = Book::new();
        book.rest(limit("b1", Side::Buy, dec!(100), dec!(10)));
        book.rest(limit("b2", Side::Buy, dec!(99), dec!(10)));

        let removed = book.remove("b1", Side::Buy).unwrap();
        assert_eq!(removed.id, "b1");
        assert_eq!(book.best_bid(), Some(dec!(99)));
        assert!(book.remove("b1", Side::Buy).is_none());
    }

    #[test]
    fn test_snapshot_aggregates_dust_levels() {
        let mut book = Book::new();
        // Two asks whose prices differ below display precision must merge
        book.rest(limit("a1", Side::Sell, dec!(1.258), dec!(10)));
        book.rest(limit("a2", Side::Sell, dec!(1.2580001), dec!(5)));
        book.rest(limit("b1", Side::Buy, dec!(1.25), dec!(7)));

        let (bids, asks) = book.snapshot(10);
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].quantity, dec!(15));
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, dec!(1.25));
    }

    #[test]
    fn test_snapshot_ordering_and_depth() {
        let mut book = Book::new();
        for (i, price) in [100, 99, 98, 97].iter().enumerate() {
            book.rest(limit(
                &format!("b{}", i),
                Side::Buy,
                Decimal::from(*price),
                dec!(1),
            ));
        }
        for (i, price) in [101, 102, 103, 104].iter().enumerate() {
            book.rest(limit(
                &format!("a{}", i),
                Side::Sell,
                Decimal::from(*price),
                dec!(1),
            ));
        }

        let (bids, asks) = book.snapshot(2);
        assert_eq!(
            bids.iter().map(|l| l.price).collect::<Vec<_>>(),
            vec![dec!(100.00), dec!(99.00)]
        );
        assert_eq!(
            asks.iter().map(|l| l.price).collect::<Vec<_>>(),
            vec![dec!(101.00), dec!(102.00)]
        );
    }

    #[test]
    fn test_snapshot_depth_n_is_prefix_of_depth_n_plus_1() {
        let mut book = Book::new();
        for (i, price) in [100, 99, 98, 97, 96].iter().enumerate() {
            book.rest(limit(
                &format!("b{}", i),
                Side::Buy,
                Decimal::from(*price),
                dec!(2),
            ));
        }

        let (bids_3, _) = book.snapshot(3);
        let (bids_4, _) = book.snapshot(4);
        assert_eq!(bids_3[..], bids_4[..3]);
    }

    #[test]
    fn test_random_flow_respects_price_bounds_and_never_overfills() {
        use rand::Rng;
        use std::collections::HashMap;

        let mut book = Book::new();
        let mut rng = rand::thread_rng();

        let mut submitted: HashMap<String, Decimal> = HashMap::new();
        let mut limits: HashMap<String, Decimal> = HashMap::new();
        let mut filled: HashMap<String, Decimal> = HashMap::new();

        for i in 0..500 {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let price = Decimal::from(90 + rng.gen_range(0..21u32));
            let qty = Decimal::from(rng.gen_range(1..10u32));

            let order = limit(&format!("o{}", i), side, price, qty);
            submitted.insert(order.id.clone(), qty);
            limits.insert(order.id.clone(), price);
            book.rest(order);

            for fill in book.match_crossing() {
                // Limit/limit fills print inside both limits
                let bid_limit = limits[&fill.buy_order_id];
                let ask_limit = limits[&fill.sell_order_id];
                assert!(bid_limit >= fill.price && fill.price >= ask_limit);
                assert!(fill.quantity > Decimal::ZERO);

                *filled.entry(fill.buy_order_id.clone()).or_default() += fill.quantity;
                *filled.entry(fill.sell_order_id.clone()).or_default() += fill.quantity;
            }
        }

        // No order ever fills beyond what was submitted
        for (id, total) in &filled {
            assert!(total <= &submitted[id], "order {} overfilled", id);
        }
    }

    #[test]
    fn test_market_residual_rests_until_liquidity_arrives() {
        let mut book = Book::new();
        book.rest(market("m1", Side::Buy, dec!(5)));
        assert!(book.match_crossing().is_empty());

        // Liquidity arrives later; the resting market order takes it
        book.rest(limit("a1", Side::Sell, dec!(100), dec!(3)));
        let fills = book.match_crossing();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(100));
        assert_eq!(fills[0].quantity, dec!(3));
    }
}
