//! Schema bootstrap
//!
//! `CREATE TABLE IF NOT EXISTS` DDL for every table this crate owns, run
//! once at startup. Deposit/withdraw/kline/task tables belong to the
//! out-of-scope collaborators and are not created here.

use sqlx::PgPool;

use crate::error::CoreResult;

const DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id              VARCHAR(24) PRIMARY KEY,
        wallet_address  VARCHAR(42) NOT NULL,
        kind            SMALLINT NOT NULL DEFAULT 0,
        user_level      VARCHAR(20) NOT NULL DEFAULT 'normal',
        nonce           VARCHAR(100) NOT NULL DEFAULT '',
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_users_wallet
        ON users (LOWER(wallet_address))"#,
    r#"CREATE TABLE IF NOT EXISTS trading_pairs (
        id                    VARCHAR(24) PRIMARY KEY,
        symbol                VARCHAR(20) NOT NULL UNIQUE,
        base_asset            VARCHAR(10) NOT NULL,
        quote_asset           VARCHAR(10) NOT NULL,
        min_price             NUMERIC(20,8) NOT NULL DEFAULT 0,
        max_price             NUMERIC(20,8) NOT NULL DEFAULT 0,
        min_qty               NUMERIC(20,8) NOT NULL DEFAULT 0,
        max_qty               NUMERIC(20,8) NOT NULL DEFAULT 0,
        status                VARCHAR(20) NOT NULL DEFAULT 'active',
        simulator_enabled     BOOLEAN NOT NULL DEFAULT FALSE,
        activity_level        INTEGER NOT NULL DEFAULT 5,
        orderbook_depth       INTEGER NOT NULL DEFAULT 15,
        trade_frequency       INTEGER NOT NULL DEFAULT 20,
        price_volatility      NUMERIC(10,4) NOT NULL DEFAULT 0.01,
        virtual_trade_per_10s INTEGER NOT NULL DEFAULT 10,
        price_spread_ratio    NUMERIC(10,2) NOT NULL DEFAULT 1.0,
        created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at            TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS balances (
        id          VARCHAR(24) PRIMARY KEY,
        user_id     VARCHAR(24) NOT NULL,
        asset       VARCHAR(10) NOT NULL,
        available   NUMERIC(30,8) NOT NULL DEFAULT 0,
        frozen      NUMERIC(30,8) NOT NULL DEFAULT 0,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uq_balances_user_asset UNIQUE (user_id, asset),
        CONSTRAINT ck_balances_available CHECK (available >= 0),
        CONSTRAINT ck_balances_frozen CHECK (frozen >= 0)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS orders (
        id          VARCHAR(24) PRIMARY KEY,
        user_id     VARCHAR(24) NOT NULL,
        symbol      VARCHAR(20) NOT NULL,
        order_type  VARCHAR(20) NOT NULL,
        side        VARCHAR(10) NOT NULL,
        price       NUMERIC(20,8) NOT NULL DEFAULT 0,
        quantity    NUMERIC(20,8) NOT NULL,
        filled_qty  NUMERIC(20,8) NOT NULL DEFAULT 0,
        status      VARCHAR(20) NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_orders_symbol_status ON orders (symbol, status)"#,
    r#"CREATE TABLE IF NOT EXISTS trades (
        id            VARCHAR(24) PRIMARY KEY,
        symbol        VARCHAR(20) NOT NULL,
        buy_order_id  VARCHAR(64) NOT NULL,
        sell_order_id VARCHAR(64) NOT NULL,
        price         NUMERIC(20,8) NOT NULL,
        quantity      NUMERIC(20,8) NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_trades_symbol_time ON trades (symbol, created_at DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS fee_configs (
        id              VARCHAR(24) PRIMARY KEY,
        user_level      VARCHAR(20) NOT NULL UNIQUE,
        maker_fee_rate  NUMERIC(10,6) NOT NULL,
        taker_fee_rate  NUMERIC(10,6) NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS fee_records (
        id         VARCHAR(24) PRIMARY KEY,
        user_id    VARCHAR(24) NOT NULL,
        order_id   VARCHAR(24) NOT NULL,
        trade_id   VARCHAR(24) NOT NULL,
        asset      VARCHAR(10) NOT NULL,
        amount     NUMERIC(30,8) NOT NULL,
        fee_rate   NUMERIC(10,6) NOT NULL,
        role       VARCHAR(10) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_fee_records_user ON fee_records (user_id)"#,
    r#"CREATE TABLE IF NOT EXISTS system_configs (
        id          VARCHAR(24) PRIMARY KEY,
        key         VARCHAR(100) NOT NULL UNIQUE,
        value       VARCHAR(500) NOT NULL,
        description VARCHAR(200) NOT NULL DEFAULT '',
        category    VARCHAR(50) NOT NULL DEFAULT '',
        value_type  VARCHAR(20) NOT NULL DEFAULT 'string',
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS market_maker_pnl (
        id             VARCHAR(24) PRIMARY KEY,
        symbol         VARCHAR(20) NOT NULL,
        trade_id       VARCHAR(24) NOT NULL DEFAULT '',
        side           VARCHAR(10) NOT NULL,
        execute_price  NUMERIC(20,8) NOT NULL,
        market_price   NUMERIC(20,8) NOT NULL,
        quantity       NUMERIC(20,8) NOT NULL,
        profit_loss    NUMERIC(20,8) NOT NULL DEFAULT 0,
        profit_percent NUMERIC(10,4) NOT NULL DEFAULT 0,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_mm_pnl_symbol_side_time
        ON market_maker_pnl (symbol, side, created_at DESC)"#,
];

/// Create every table and index this crate owns.
pub async fn init_schema(pool: &PgPool) -> CoreResult<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("schema ready ({} statements)", DDL.len());
    Ok(())
}
