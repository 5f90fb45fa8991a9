//! HTTP route handlers.
//!
//! Monitored routes run under `monitor_layer`, which samples each request
//! and exposes the request scope to handlers. The liveness probe is merged
//! after the layer so orchestrator polling does not show up in the samples.

pub mod db;
pub mod health;
pub mod monitor;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::middleware::monitor_layer;
use crate::state::AppState;

/// Route pattern of the health report, also used as its dispatch command.
pub const MONITOR_ROUTE: &str = "/monitor";

/// Route that forwards internally to the health report.
pub const MONITOR_FORWARD_ROUTE: &str = "/monitor/forward";

pub const DB_PING_ROUTE: &str = "/db/ping";

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let monitored_routes = Router::new()
        .route(MONITOR_ROUTE, get(monitor::report))
        .route(MONITOR_FORWARD_ROUTE, get(monitor::forward))
        .route(DB_PING_ROUTE, get(db::ping))
        .route_layer(middleware::from_fn_with_state(state.clone(), monitor_layer));

    // Health check - unsampled, always fresh for liveness probes
    let health_routes = Router::new().route("/health", get(health::health));

    Router::new()
        .merge(monitored_routes)
        .merge(health_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
