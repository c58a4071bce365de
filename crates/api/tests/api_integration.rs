//! Integration tests for the API server.

use std::sync::OnceLock;

use api::DemoServices;
use api::state::AppStore;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;
use transaction_store::InMemoryTransactionStore;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup() -> (axum::Router, DemoServices) {
    let demo = DemoServices::default();
    let store = AppStore::Memory(InMemoryTransactionStore::new());
    let state = api::create_default_state(store, demo.clone()).await.unwrap();
    (api::create_app(state, get_metrics_handle()), demo)
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    (status, json)
}

fn order(order_id: &str) -> Value {
    json!({
        "order_id": order_id,
        "customer_id": "cust-1",
        "items": [
            {"product_id": "SKU-001", "quantity": 2, "unit_price_cents": 1500},
            {"product_id": "SKU-002", "quantity": 1, "unit_price_cents": 999}
        ]
    })
}

async fn start_order(app: &axum::Router, transaction_id: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/workflows/order-fulfillment/run",
        Some(json!({
            "input": order(transaction_id),
            "transaction_id": transaction_id,
            "context": {"actor": "test"}
        })),
    )
    .await
}

fn transaction_uri(transaction_id: &str) -> String {
    format!("/workflows/order-fulfillment/transactions/{transaction_id}")
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
    assert_eq!(json["workflows"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup().await;
    start_order(&app, "tx-metrics").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("workflow_runs_total"));
}

#[tokio::test]
async fn test_list_workflows() {
    let (app, _) = setup().await;

    let (status, json) = send(&app, "GET", "/workflows", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["workflows"], json!(["order-fulfillment"]));
}

#[tokio::test]
async fn test_run_suspends_on_shipment() {
    let (app, demo) = setup().await;

    let (status, json) = start_order(&app, "tx-1").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["transaction"]["state"], "invoking");
    assert_eq!(json["transaction"]["waiting_on"], json!(["create_shipment"]));
    assert_eq!(json["result"]["reserve_inventory"]["reservation_id"], "RES-0001");
    assert_eq!(json["result"]["process_payment"]["amount_cents"], 3999);
    assert_eq!(demo.inventory.reservation_count().await, 1);
    assert_eq!(demo.payment.payment_count().await, 1);
    assert_eq!(demo.shipping.pickup_count().await, 1);
}

#[tokio::test]
async fn test_success_signal_finishes_run() {
    let (app, _) = setup().await;
    start_order(&app, "tx-2").await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("{}/steps/create_shipment/success", transaction_uri("tx-2")),
        Some(json!({"tracking_number": "TRACK-42"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transaction"]["state"], "done");
    assert_eq!(json["result"]["create_shipment"]["tracking_number"], "TRACK-42");

    let (status, json) = send(&app, "GET", &transaction_uri("tx-2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "done");
    assert_eq!(json["steps"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_declined_payment_reverts() {
    let (app, demo) = setup().await;
    demo.payment.set_decline(true).await;

    let (status, json) = start_order(&app, "tx-3").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transaction"]["state"], "reverted");
    assert_eq!(json["errors"][0]["action"], "process_payment");
    assert_eq!(demo.inventory.reservation_count().await, 0);
    assert_eq!(demo.shipping.pickup_count().await, 0);
}

#[tokio::test]
async fn test_failure_signal_rolls_back() {
    let (app, demo) = setup().await;
    start_order(&app, "tx-4").await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("{}/steps/create_shipment/failure", transaction_uri("tx-4")),
        Some(json!({"error": "address rejected", "permanent": true})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transaction"]["state"], "reverted");
    assert_eq!(json["errors"][0]["error"], "address rejected");
    assert_eq!(demo.inventory.reservation_count().await, 0);
    assert_eq!(demo.payment.payment_count().await, 0);
}

#[tokio::test]
async fn test_cancel_suspended_run() {
    let (app, demo) = setup().await;
    start_order(&app, "tx-5").await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("{}/cancel", transaction_uri("tx-5")),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transaction"]["state"], "reverted");
    assert_eq!(json["transaction"]["cancelled"], true);
    assert_eq!(demo.payment.payment_count().await, 0);

    let (status, _) = send(
        &app,
        "POST",
        &format!("{}/cancel", transaction_uri("tx-5")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rerun_returns_existing_transaction() {
    let (app, demo) = setup().await;
    start_order(&app, "tx-6").await;

    let (status, json) = start_order(&app, "tx-6").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["transaction"]["transaction_id"], "tx-6");
    assert_eq!(demo.payment.payment_count().await, 1);
}

#[tokio::test]
async fn test_signal_on_finished_step_conflicts() {
    let (app, _) = setup().await;
    start_order(&app, "tx-7").await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("{}/steps/reserve_inventory/success", transaction_uri("tx-7")),
        Some(json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_input_rejected() {
    let (app, demo) = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/workflows/order-fulfillment/run",
        Some(json!({"input": {"order_id": "o-1", "customer_id": "c-1", "items": []}})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["stage"], "Input");
    assert_eq!(json["issues"][0]["path"], "/items");
    assert_eq!(demo.inventory.reservation_count().await, 0);
}

#[tokio::test]
async fn test_not_found() {
    let (app, _) = setup().await;

    let (status, _) = send(
        &app,
        "POST",
        "/workflows/unknown/run",
        Some(json!({"input": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &transaction_uri("missing"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        &format!("{}/steps/create_shipment/success", transaction_uri("missing")),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_transaction_id_rejected() {
    let (app, _) = setup().await;

    let (status, _) = send(
        &app,
        "POST",
        "/workflows/order-fulfillment/run",
        Some(json!({"input": order("o-1"), "transaction_id": ""})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_overflowing_order_total_rejected() {
    let (app, demo) = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/workflows/order-fulfillment/run",
        Some(json!({"input": {
            "order_id": "o-1",
            "customer_id": "c-1",
            "items": [{"product_id": "SKU-001", "quantity": u32::MAX, "unit_price_cents": i64::MAX}]
        }})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["issues"][0]["path"], "/items/0");
    assert_eq!(demo.payment.payment_count().await, 0);
}
