//! HTTP API server with observability for the allocation service.
//!
//! Exposes the allocation use cases over REST, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use service::AllocationService;
use store::UnitOfWorkFactory;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<F: UnitOfWorkFactory + 'static>(
    state: Arc<AppState<F>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/allocate", post(routes::allocations::allocate::<F>))
        .route("/reallocate", post(routes::allocations::reallocate::<F>))
        .route("/batches", post(routes::batches::add::<F>))
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

/// Creates the application state around a store.
pub fn create_state<F: UnitOfWorkFactory + 'static>(store: F) -> Arc<AppState<F>> {
    Arc::new(AppState {
        allocation_service: AllocationService::new(store),
    })
}
