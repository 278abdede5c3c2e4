//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::demo::{DEMO_ADMIN_ID, DEMO_CLIENT_ID, seed_catalog, seed_users};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::{NotificationStatus, ProductId};
use event_log::InMemoryEventLog;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    Collaborators, FixedDecision, InMemoryCatalog, InMemoryNotificationQueue, InMemoryOrderStore,
    InMemoryPaymentLedger, InMemoryUserDirectory, OrderFulfillment,
};
use serde_json::{Value, json};
use tower::ServiceExt;

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

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    catalog: InMemoryCatalog,
    queue: InMemoryNotificationQueue,
    log: Arc<InMemoryEventLog>,
}

async fn setup(accept: bool) -> TestApp {
    let users = InMemoryUserDirectory::new();
    seed_users(&users).await;
    let catalog = InMemoryCatalog::new();
    seed_catalog(&catalog).await;
    let queue = InMemoryNotificationQueue::new();
    let log = Arc::new(InMemoryEventLog::new());

    let saga = OrderFulfillment::new(
        Collaborators {
            users: Arc::new(users),
            catalog: Arc::new(catalog.clone()),
            orders: Arc::new(InMemoryOrderStore::new()),
            payments: Arc::new(InMemoryPaymentLedger::new()),
            notifications: Arc::new(queue.clone()),
        },
        Arc::new(FixedDecision(accept)),
    )
    .with_fact_log(log.clone());

    let state = AppState::new(saga);
    let router = api::create_app(state.clone(), get_metrics_handle());

    TestApp {
        router,
        state,
        catalog,
        queue,
        log,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

async fn create_order(app: &TestApp, quantity: i64) -> Value {
    let (status, order) = send(
        app,
        "POST",
        "/orders",
        Some(json!({
            "userId": DEMO_CLIENT_ID,
            "items": [{ "productId": 2, "quantity": quantity }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    order
}

fn payment_body(order: &Value) -> Value {
    json!({
        "orderId": order["id"],
        "paymentMethod": "credit_card",
        "value": order["total"],
        "products": order["items"],
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = setup(true).await;

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");

    let (status, banner) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(banner.as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn test_create_order() {
    let app = setup(true).await;

    let order = create_order(&app, 2).await;

    assert_eq!(order["status"], "AWAITING_PAYMENT");
    assert_eq!(order["total"], "100.00");
    assert_eq!(order["items"][0]["name"], "Wireless Mouse");
    assert!(order["id"].as_str().is_some());
    assert_eq!(app.log.fact_count(domain::ORDER_CREATED_TOPIC).await, 1);
}

#[tokio::test]
async fn test_create_order_validation_errors() {
    let app = setup(true).await;

    let (status, json) = send(&app, "POST", "/orders", Some(json!({ "items": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION");

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "userId": DEMO_CLIENT_ID, "items": [{ "productId": 2, "quantity": 0 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION");

    let (status, json) = send(&app, "POST", "/orders", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION");
}

#[tokio::test]
async fn test_create_order_error_mapping() {
    let app = setup(true).await;

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "userId": DEMO_ADMIN_ID, "items": [{ "productId": 2, "quantity": 1 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "FORBIDDEN");

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "userId": DEMO_CLIENT_ID, "items": [{ "productId": 404, "quantity": 1 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "userId": DEMO_CLIENT_ID, "items": [{ "productId": 3, "quantity": 6 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INSUFFICIENT_STOCK");
}

#[tokio::test]
async fn test_create_list_and_get_order() {
    let app = setup(true).await;
    let first = create_order(&app, 1).await;
    let second = create_order(&app, 1).await;

    let (status, list) = send(&app, "GET", "/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&Value> = list.as_array().unwrap().iter().map(|o| &o["id"]).collect();
    assert_eq!(ids, vec![&second["id"], &first["id"]]);

    let uri = format!("/orders/{}", first["id"].as_str().unwrap());
    let (status, fetched) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, first);
}

#[tokio::test]
async fn test_get_order_errors() {
    let app = setup(true).await;

    let (status, json) = send(&app, "GET", "/orders/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION");

    let uri = format!("/orders/{}", domain::OrderId::new());
    let (status, json) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_update_status_is_conditional() {
    let app = setup(true).await;
    let order = create_order(&app, 1).await;
    let uri = format!("/orders/{}/status", order["id"].as_str().unwrap());

    let (status, updated) = send(
        &app,
        "PATCH",
        &uri,
        Some(json!({ "status": "CANCELLED", "expected": "AWAITING_PAYMENT" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "CANCELLED");

    let (status, json) = send(&app, "PATCH", &uri, Some(json!({ "status": "PAID" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");

    let (status, _) = send(&app, "PATCH", &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_accepted_payment_settles_order() {
    let app = setup(true).await;
    let order = create_order(&app, 2).await;

    let (status, payment) = send(&app, "POST", "/payments", Some(payment_body(&order))).await;
    assert_eq!(status, StatusCode::CREATED, "{payment}");
    assert_eq!(payment["status"], "PAID");
    assert_eq!(payment["value"], "100.00");

    let uri = format!("/orders/{}", order["id"].as_str().unwrap());
    let (_, fetched) = send(&app, "GET", &uri, None).await;
    assert_eq!(fetched["status"], "PAID");
    assert_eq!(app.catalog.stock_of(ProductId::new(2)).await, Some(98));

    let published = app.queue.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].status, NotificationStatus::Approved);

    // Same request again returns the recorded payment without side effects.
    let (status, again) = send(&app, "POST", "/payments", Some(payment_body(&order))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], payment["id"]);
    assert_eq!(app.catalog.stock_of(ProductId::new(2)).await, Some(98));
}

#[tokio::test]
async fn test_rejected_payment_fails_order() {
    let app = setup(false).await;
    let order = create_order(&app, 1).await;

    let (status, payment) = send(&app, "POST", "/payments", Some(payment_body(&order))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["status"], "FAILED");

    let uri = format!("/orders/{}", order["id"].as_str().unwrap());
    let (_, fetched) = send(&app, "GET", &uri, None).await;
    assert_eq!(fetched["status"], "PAYMENT_FAILED");
    assert_eq!(app.catalog.stock_of(ProductId::new(2)).await, Some(100));
    assert_eq!(app.queue.published().await[0].status, NotificationStatus::Rejected);
}

#[tokio::test]
async fn test_payment_for_cancelled_order_conflicts() {
    let app = setup(true).await;
    let order = create_order(&app, 2).await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/orders/{id}/status"),
        Some(json!({ "status": "CANCELLED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, "POST", "/payments", Some(payment_body(&order))).await;
    assert_eq!(status, StatusCode::CONFLICT, "{json}");
    assert_eq!(json["code"], "CONFLICT");

    let (status, _) = send(&app, "GET", &format!("/payments/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.catalog.stock_of(ProductId::new(2)).await, Some(100));
    assert!(app.queue.published().await.is_empty());
}

#[tokio::test]
async fn test_payment_validation() {
    let app = setup(true).await;
    let order = create_order(&app, 1).await;

    let mut missing = payment_body(&order);
    missing.as_object_mut().unwrap().remove("products");
    let (status, json) = send(&app, "POST", "/payments", Some(missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION");

    let mut wrong_value = payment_body(&order);
    wrong_value["value"] = json!("1.00");
    let (status, json) = send(&app, "POST", "/payments", Some(wrong_value)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION");
}

#[tokio::test]
async fn test_settlement_failure_reports_inconsistent_state_with_payment() {
    let app = setup(true).await;
    let order = create_order(&app, 1).await;
    app.catalog.set_fail_on_adjust(true);

    let (status, json) = send(&app, "POST", "/payments", Some(payment_body(&order))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INCONSISTENT_STATE");
    assert_eq!(json["payment"]["status"], "PAID");
    assert!(json["error"].as_str().unwrap().contains("reconciliation"));
}

#[tokio::test]
async fn test_fact_driven_processing() {
    let app = setup(true).await;
    let order = create_order(&app, 1).await;
    let order_id = order["id"].as_str().unwrap();
    let process_uri = format!("/payments/{order_id}/process");

    // No placeholder until the fact is consumed.
    let (status, _) = send(&app, "POST", &process_uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let subscriber = app.state.saga.subscriber(app.log.clone(), "payment-service");
    assert_eq!(subscriber.poll_once().await.unwrap().handled, 1);

    let (status, pending) = send(&app, "GET", &format!("/payments/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["status"], "PENDING_PROCESS");

    let (status, json) = send(
        &app,
        "POST",
        &process_uri,
        Some(json!({ "paymentMethod": "pix" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["payment"]["status"], "PAID");
    assert!(json["message"].as_str().is_some());

    let (status, json) = send(&app, "POST", &process_uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["payment"]["status"], "PAID");
    assert_eq!(app.queue.published().await.len(), 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup(true).await;
    create_order(&app, 1).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}
