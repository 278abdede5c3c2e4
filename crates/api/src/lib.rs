//! HTTP API for the order fulfillment services.
//!
//! Exposes order creation and queries, the synchronous and fact-driven
//! payment entry points, and Prometheus metrics, with structured logging
//! (tracing) on every request.

pub mod bootstrap;
pub mod config;
pub mod demo;
pub mod error;
pub mod notifier;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::OrderFulfillment;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: OrderFulfillment,
}

impl AppState {
    pub fn new(saga: OrderFulfillment) -> Arc<Self> {
        Arc::new(Self { saga })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/", get(routes::health::banner))
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create).get(routes::orders::list))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/status", patch(routes::orders::update_status))
        .route("/payments", post(routes::payments::decide))
        .route("/payments/{order_id}", get(routes::payments::get))
        .route("/payments/{order_id}/process", post(routes::payments::process))
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
