//! Market-making controller
//!
//! One controller serves every trading pair with the simulator enabled.
//! Four perpetual loops share its state:
//!
//! - the configuration monitor (here) re-reads enabled pairs every 10 s,
//!   spawns a quoting task per newly enabled symbol and signals removed
//!   ones to wind down;
//! - [`quoting`] (one task per symbol) lays down virtual depth and keeps
//!   the tape moving;
//! - [`taker`] sweeps resting real orders every 200 ms and settles those
//!   fills directly, bypassing the engine and the settlement pipeline;
//! - [`balancer`] re-centers the quoted midpoint when realized flow skews.
//!
//! Virtual orders are rows only - they are never submitted to the matching
//! engine, so virtual depth can never cross real orders through the engine
//! and double-credit anyone.

pub mod balancer;
pub mod quoting;
pub mod taker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::engine::EngineHub;
use crate::error::CoreResult;
use crate::events::EventBus;
use crate::ledger::Ledger;
use crate::models::TradingPair;
use crate::persistence::{orders, pairs, users};

/// Seed balance credited to the virtual maker per asset; effectively
/// unlimited inventory, its economics are tracked in the PnL ledger.
const MAKER_SEED_BALANCE: Decimal = dec!(100000000);

const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

pub struct MarketMaker {
    pub(crate) pool: PgPool,
    pub(crate) hub: Arc<EngineHub>,
    pub(crate) ledger: Ledger,
    pub(crate) events: EventBus,
    pub(crate) maker_id: String,
    active: RwLock<HashSet<String>>,
    configs: RwLock<HashMap<String, TradingPair>>,
    adjustment: RwLock<HashMap<String, Decimal>>,
    reload: RwLock<HashMap<String, mpsc::Sender<()>>>,
}

impl MarketMaker {
    /// Ensure the virtual maker user exists and build the controller.
    pub async fn bootstrap(
        pool: PgPool,
        hub: Arc<EngineHub>,
        ledger: Ledger,
        events: EventBus,
    ) -> CoreResult<Arc<Self>> {
        let maker = users::ensure_virtual_maker(&pool).await?;
        tracing::info!(maker_id = %maker.id, "virtual maker ready");

        Ok(Arc::new(Self {
            pool,
            hub,
            ledger,
            events,
            maker_id: maker.id,
            active: RwLock::new(HashSet::new()),
            configs: RwLock::new(HashMap::new()),
            adjustment: RwLock::new(HashMap::new()),
            reload: RwLock::new(HashMap::new()),
        }))
    }

    /// Spawn the monitor, taker and balancer loops. Quoting loops are
    /// spawned by the monitor as symbols come online.
    pub fn start(self: &Arc<Self>) {
        let mm = self.clone();
        tokio::spawn(async move { mm.monitor_loop().await });

        let mm = self.clone();
        tokio::spawn(async move { taker::taker_loop(mm).await });

        let mm = self.clone();
        tokio::spawn(async move { balancer::balancer_loop(mm).await });

        tracing::info!("market-making controller started");
    }

    /// Loop A: watch trading-pair configuration.
    async fn monitor_loop(self: Arc<Self>) {
        let mut ticker = interval(MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(err) = self.update_active_pairs().await {
                tracing::warn!(error = %err, "pair configuration scan failed");
            }
        }
    }

    async fn update_active_pairs(self: &Arc<Self>) -> CoreResult<()> {
        let enabled = pairs::list_simulated(&self.pool).await?;
        let enabled_symbols: HashSet<String> =
            enabled.iter().map(|p| p.symbol.clone()).collect();

        for pair in enabled {
            let symbol = pair.symbol.clone();

            let changed = {
                let configs = self.configs.read().await;
                configs
                    .get(&symbol)
                    .map(|old| old.tunables_changed(&pair))
                    .unwrap_or(false)
            };
            let newly_active = !self.active.read().await.contains(&symbol);

            self.configs.write().await.insert(symbol.clone(), pair.clone());

            if newly_active {
                self.active.write().await.insert(symbol.clone());
                self.ensure_maker_funding(&pair).await?;

                let (reload_tx, reload_rx) = mpsc::channel(4);
                self.reload.write().await.insert(symbol.clone(), reload_tx);

                tracing::info!(
                    symbol = %symbol,
                    activity = pair.activity_level,
                    "quoting enabled"
                );
                let mm = self.clone();
                tokio::spawn(async move {
                    quoting::quoting_loop(mm, symbol, reload_rx).await;
                });
            } else if changed {
                tracing::info!(
                    symbol = %symbol,
                    activity = pair.activity_level,
                    depth = pair.orderbook_depth,
                    frequency = pair.trade_frequency,
                    "pair tunables changed, notifying quoting task"
                );
                if let Some(tx) = self.reload.read().await.get(&symbol) {
                    let _ = tx.try_send(());
                }
            }
        }

        // Symbols that dropped out: the quoting loop sees the flag flip on
        // its next tick, purges its orders and exits
        let stale: Vec<String> = {
            let active = self.active.read().await;
            active.difference(&enabled_symbols).cloned().collect()
        };
        for symbol in stale {
            tracing::info!(symbol = %symbol, "quoting disabled");
            self.active.write().await.remove(&symbol);
            self.reload.write().await.remove(&symbol);
        }

        Ok(())
    }

    /// Credit the maker's base/quote inventory for a pair unless it
    /// already holds the asset.
    async fn ensure_maker_funding(&self, pair: &TradingPair) -> CoreResult<()> {
        for asset in [pair.base_asset.as_str(), pair.quote_asset.as_str()] {
            if self.ledger.get(&self.maker_id, asset).await?.is_none() {
                self.ledger
                    .deposit(&self.maker_id, asset, MAKER_SEED_BALANCE)
                    .await?;
                tracing::info!(asset, "virtual maker funded");
            }
        }
        Ok(())
    }

    /// Id of the virtual maker user this controller settles as.
    pub fn maker_user_id(&self) -> &str {
        &self.maker_id
    }

    pub(crate) async fn is_active(&self, symbol: &str) -> bool {
        self.active.read().await.contains(symbol)
    }

    pub(crate) async fn active_symbols(&self) -> Vec<String> {
        self.active.read().await.iter().cloned().collect()
    }

    pub(crate) async fn config_for(&self, symbol: &str) -> Option<TradingPair> {
        self.configs.read().await.get(symbol).cloned()
    }

    pub(crate) async fn adjustment_for(&self, symbol: &str) -> Decimal {
        self.adjustment
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub(crate) async fn set_adjustment(&self, symbol: &str, adj: Decimal) {
        self.adjustment
            .write()
            .await
            .insert(symbol.to_string(), adj);
    }

    /// Delete every open virtual order for a symbol.
    pub(crate) async fn purge_virtual_orders(&self, symbol: &str) -> CoreResult<u64> {
        let removed = orders::delete_virtual_open(&self.pool, symbol, &self.maker_id).await?;
        if removed > 0 {
            tracing::debug!(symbol, removed, "virtual orders purged");
        }
        Ok(removed)
    }
}
