//! Service layer - the operations the request layer drives
//!
//! [`orders`] owns submit/cancel and the order-status queries;
//! [`market`] owns the public order book (real + virtual depth merged)
//! and the ticker.

pub mod market;
pub mod orders;

pub use market::MarketService;
pub use orders::{OrderService, SubmitOrderRequest};
