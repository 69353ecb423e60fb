//! HTTP API server for the storefront engine.
//!
//! Exposes catalog, cart, checkout, order and payment-callback endpoints over
//! a [`Storefront`], with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use engine::services::{InMemoryPaymentGateway, PaymentGateway};
use engine::{EngineConfig, Storefront};
use metrics_exporter_prometheus::PrometheusHandle;
use row_store::RowStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub storefront: Storefront<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: RowStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{carts, health, metrics, orders, payments, products};

    let metrics_router = Router::new()
        .route("/metrics", get(metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(health::check))
        .route("/products", post(products::create::<S>).get(products::list::<S>))
        .route("/products/{id}/restock", post(products::restock::<S>))
        .route("/products/{id}/stock", get(products::stock::<S>))
        .route("/carts/{customer}", get(carts::get::<S>).delete(carts::clear::<S>))
        .route("/carts/{customer}/items", post(carts::add_item::<S>))
        .route(
            "/carts/{customer}/items/{product}",
            put(carts::set_quantity::<S>).delete(carts::remove_item::<S>),
        )
        .route("/carts/{customer}/checkout", post(carts::checkout::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/payment", post(orders::begin_payment::<S>))
        .route("/orders/{id}/fulfill", post(orders::fulfill::<S>))
        .route("/orders/{id}/cancel", post(orders::cancel::<S>))
        .route("/orders/{id}/refund", post(orders::refund::<S>))
        .route("/payments/callback", post(payments::callback::<S>))
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

/// Creates application state backed by `store` and the given gateway.
pub fn create_state<S: RowStore + Clone + 'static>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    config: EngineConfig,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        storefront: Storefront::new(store, gateway, config),
    })
}

/// Creates application state with the in-memory payment gateway.
pub fn create_default_state<S: RowStore + Clone + 'static>(
    store: S,
    config: EngineConfig,
) -> Arc<AppState<S>> {
    create_state(store, Arc::new(InMemoryPaymentGateway::new()), config)
}
