//! Land registry service.
//!
//! Runs the saga worker against the registry queue and exposes health and
//! Prometheus metrics over HTTP, with structured logging (tracing).

pub mod config;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{LedgerService, MessageBus};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Collaborators the HTTP surface reports on.
pub struct AppState<L, B> {
    pub ledger: L,
    pub bus: B,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L, B>(state: Arc<AppState<L, B>>, metrics_handle: PrometheusHandle) -> Router
where
    L: LedgerService + 'static,
    B: MessageBus + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<L, B>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
