use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::time::Duration;

use spotcore::config::AppConfig;
use spotcore::engine::EngineHub;
use spotcore::events::EventBus;
use spotcore::fees::{self, FeeService};
use spotcore::gateway::{self, AppState};
use spotcore::ledger::Ledger;
use spotcore::logging;
use spotcore::marketmaker::MarketMaker;
use spotcore::persistence;
use spotcore::service::{MarketService, OrderService};
use spotcore::settlement::SettlementPipeline;
use spotcore::sysconfig::ConfigStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = AppConfig::load(&config_path)?;
    let _log_guard = logging::init_logging(&config);

    tracing::info!("spotcore starting");

    let pool = PgPoolOptions::new()
        .max_connections(config.core.db_max_connections)
        .connect(&config.database_url)
        .await?;
    persistence::schema::init_schema(&pool).await?;

    // Hot-reloading runtime configuration + fee defaults
    let store = Arc::new(ConfigStore::new(pool.clone()));
    fees::seed_default_fee_configs(&pool, &store).await?;
    store.load().await?;
    store.spawn_refresh(Duration::from_secs(config.core.sysconfig_refresh_secs));

    if config.core.seed_demo_markets {
        spotcore::seed::seed_demo_markets(&pool).await?;
    }

    let ledger = Ledger::new(pool.clone());
    let events = EventBus::new();

    // Engines share one bounded trade channel into settlement
    let (hub, trade_rx) = EngineHub::new(config.core.trade_channel_capacity);

    // The book is not durable: rebuild it from open orders
    let open_orders = persistence::orders::open_real_orders_all(&pool).await?;
    hub.rebuild(&open_orders).await;

    let pipeline = SettlementPipeline::new(
        pool.clone(),
        ledger.clone(),
        FeeService::new(store.clone()),
        events.clone(),
        trade_rx,
    );
    tokio::spawn(pipeline.run());

    let maker =
        MarketMaker::bootstrap(pool.clone(), hub.clone(), ledger.clone(), events.clone())
            .await?;
    maker.start();

    let state = AppState {
        orders: Arc::new(OrderService::new(pool.clone(), ledger.clone(), hub.clone())),
        market: Arc::new(MarketService::new(
            pool.clone(),
            hub.clone(),
            maker.maker_user_id().to_string(),
        )),
        ledger,
    };

    gateway::serve(state, &config.gateway.host, config.gateway.port).await
}
