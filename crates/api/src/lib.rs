//! HTTP API for the order and payment saga.
//!
//! Exposes order and payment endpoints over the [`saga::SagaCoordinator`],
//! with JWT caller authentication, structured logging (tracing) and
//! Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, Backend};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/orders", post(routes::orders::create))
        .route("/orders/me", get(routes::orders::list_mine))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/address", patch(routes::orders::update_address))
        .route("/orders/{id}/advance", post(routes::orders::advance))
        .route("/payment/create/{order_id}", post(routes::payments::create))
        .route("/payment/verify", post(routes::payments::verify))
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
