//! HTTP API server with observability for the workflow engine.
//!
//! Exposes workflow runs and async step signals over REST, with structured
//! logging (tracing) and Prometheus metrics. Ships with an order
//! fulfillment workflow backed by in-memory services.

pub mod config;
pub mod error;
pub mod fulfillment;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{OrchestratorError, ServiceResolver, WorkflowEngine};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fulfillment::{
    FulfillmentServices, InMemoryInventoryService, InMemoryPaymentService,
    InMemoryShippingService,
};
use routes::metrics::MetricsState;
use state::{AppState, AppStore};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            app: state.clone(),
        });

    let transaction = "/workflows/{workflow_id}/transactions/{transaction_id}";

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/workflows", get(routes::workflows::list))
        .route("/workflows/{workflow_id}/run", post(routes::workflows::run))
        .route(transaction, get(routes::workflows::get_transaction))
        .route(
            &format!("{transaction}/steps/{{step_id}}/success"),
            post(routes::workflows::step_success),
        )
        .route(
            &format!("{transaction}/steps/{{step_id}}/failure"),
            post(routes::workflows::step_failure),
        )
        .route(
            &format!("{transaction}/resume"),
            post(routes::workflows::resume),
        )
        .route(
            &format!("{transaction}/cancel"),
            post(routes::workflows::cancel),
        )
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

/// In-memory services behind the fulfillment workflow.
#[derive(Clone, Default)]
pub struct DemoServices {
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub shipping: InMemoryShippingService,
}

/// Builds the engine over `store` and registers the fulfillment workflow.
pub async fn create_default_state(
    store: AppStore,
    demo: DemoServices,
) -> Result<Arc<AppState>, OrchestratorError> {
    let services = ServiceResolver::new();
    services.register(FulfillmentServices::new(
        demo.inventory,
        demo.payment,
        demo.shipping,
    ));

    let store_backend = store.backend();
    let engine = WorkflowEngine::builder(store).services(services).build();
    engine.register(fulfillment::definition()?).await?;

    Ok(Arc::new(AppState {
        engine: Arc::new(engine),
        store_backend,
    }))
}
