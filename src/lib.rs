//! spotcore - Trading core for a centralized spot exchange
//!
//! The core is built from four components, dependencies flowing bottom-up:
//!
//! - [`ledger`] - Per-user, per-asset balance map with available/frozen
//!   partitioning and atomic freeze/unfreeze/settle primitives
//! - [`engine`] - Per-symbol price-time priority matching
//! - [`settlement`] - Batch consumer of trade events; one transaction per
//!   batch covering trades, order state, balances and fees
//! - [`marketmaker`] - Adaptive controller that maintains virtual depth,
//!   fills resting real orders and re-centers its quotes on inventory skew
//!
//! Everything else is plumbing around those four: sqlx repositories in
//! [`persistence`], the service layer in [`service`], and a thin axum
//! gateway in [`gateway`].

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod models;
pub mod precision;
pub mod seed;
pub mod sysconfig;

pub mod ledger;

pub mod engine;

pub mod fees;
pub mod settlement;

pub mod marketmaker;

pub mod persistence;
pub mod service;

pub mod gateway;

// Convenient re-exports at crate root
pub use engine::EngineHub;
pub use error::{CoreError, CoreResult};
pub use ledger::Ledger;
pub use models::{Order, OrderStatus, OrderType, Side, Trade};
