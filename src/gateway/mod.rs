//! Thin HTTP gateway over the service layer
//!
//! Wallet-signature authentication lives in an external collaborator; by
//! the time a request reaches this router the caller is authenticated and
//! identified by the `X-User-Id` header. The gateway does no business
//! logic of its own - it parses, delegates and maps errors.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ledger::Ledger;
use crate::service::{MarketService, OrderService};

/// Shared gateway state.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub market: Arc<MarketService>,
    pub ledger: Ledger,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/orders",
            post(handlers::create_order).get(handlers::list_orders),
        )
        .route(
            "/api/orders/:id",
            get(handlers::get_order).delete(handlers::cancel_order),
        )
        .route("/api/market/orderbook", get(handlers::order_book))
        .route("/api/market/ticker", get(handlers::ticker))
        .route("/api/market/tickers", get(handlers::all_tickers))
        .route("/api/market/trades", get(handlers::recent_trades))
        .route("/api/balances", get(handlers::balances))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("gateway listening on {}:{}", host, port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
