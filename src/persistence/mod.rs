//! Repository layer: thin async functions over sqlx
//!
//! Each module covers one table family. Functions take an executor
//! (`PgPool` for standalone statements, `&mut PgConnection` to join an
//! open transaction scope) and map rows by hand; no ORM layer.

pub mod orders;
pub mod pairs;
pub mod pnl;
pub mod schema;
pub mod trades;
pub mod users;
