//! Gateway clients against local stub servers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::ProductId;
use domain::{Currency, Money};
use saga::{
    CartLine, CartService, CatalogService, GatewayError, HttpCartService, HttpCatalogService,
    HttpClient, HttpPaymentProvider, PaymentProvider, RetryPolicy,
};
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct Stub {
    hits: Arc<AtomicUsize>,
    /// Requests answered with 503 before the stub starts succeeding.
    failures_before_success: usize,
    last_auth: Arc<Mutex<Option<String>>>,
    last_body: Arc<Mutex<Option<Value>>>,
}

impl Stub {
    fn hit(&self, headers: &HeaderMap) -> usize {
        *self.last_auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.hits.fetch_add(1, Ordering::SeqCst)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(retries: u32) -> HttpClient {
    HttpClient::new(
        Duration::from_millis(300),
        RetryPolicy::new(retries, Duration::from_millis(5)),
    )
    .unwrap()
}

async fn cart_handler(State(stub): State<Stub>, headers: HeaderMap) -> impl IntoResponse {
    let n = stub.hit(&headers);
    if n < stub.failures_before_success {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))).into_response();
    }
    Json(json!({
        "cart": {
            "items": [
                { "productId": "P1", "quantity": 2 },
                { "productId": "P2", "quantity": 1 }
            ]
        }
    }))
    .into_response()
}

async fn product_handler(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    stub.hit(&headers);
    match id.as_str() {
        "P1" => Json(json!({
            "product": {
                "_id": "P1",
                "title": "Desk Lamp",
                "price": { "amount": 100, "currency": "INR" },
                "stock": 10
            }
        }))
        .into_response(),
        "P2" => Json(json!({
            "product": {
                "_id": "P2",
                "title": "Backorder Chair",
                "price": { "amount": 900, "currency": "INR" },
                "stock": -3
            }
        }))
        .into_response(),
        "P3" => Json(json!({
            "product": {
                "_id": "P3",
                "title": "Loose Tea",
                "price": { "amount": 99.5, "currency": "INR" }
            }
        }))
        .into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            StatusCode::OK.into_response()
        }
        "garbled" => (StatusCode::OK, "not json").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn provider_handler(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let n = stub.hit(&headers);
    *stub.last_body.lock().unwrap() = Some(body.clone());
    if n < stub.failures_before_success {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "id": "order_ABC123",
        "amount": body["amount"],
        "currency": body["currency"],
        "status": "created"
    }))
    .into_response()
}

#[tokio::test]
async fn test_cart_reads_items_with_bearer_token() {
    let stub = Stub::default();
    let base = serve(
        Router::new()
            .route("/cart", get(cart_handler))
            .with_state(stub.clone()),
    )
    .await;

    let cart = HttpCartService::new(client(0), format!("{base}/"));
    let lines = cart.get_cart("tok-123").await.unwrap();

    assert_eq!(
        lines,
        vec![CartLine::new("P1", 2), CartLine::new("P2", 1)]
    );
    assert_eq!(
        stub.last_auth.lock().unwrap().as_deref(),
        Some("Bearer tok-123")
    );
}

#[tokio::test]
async fn test_missing_cart_is_empty() {
    let base = serve(Router::new().route("/cart", get(|| async { Json(json!({})) }))).await;

    let cart = HttpCartService::new(client(0), base);
    assert!(cart.get_cart("tok").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reads_are_retried_after_unavailable() {
    let stub = Stub {
        failures_before_success: 2,
        ..Stub::default()
    };
    let base = serve(
        Router::new()
            .route("/cart", get(cart_handler))
            .with_state(stub.clone()),
    )
    .await;

    let cart = HttpCartService::new(client(2), base);
    let lines = cart.get_cart("tok").await.unwrap();

    assert_eq!(lines.len(), 2);
    assert_eq!(stub.hits(), 3);
}

#[tokio::test]
async fn test_reads_give_up_after_retry_budget() {
    let stub = Stub {
        failures_before_success: 10,
        ..Stub::default()
    };
    let base = serve(
        Router::new()
            .route("/cart", get(cart_handler))
            .with_state(stub.clone()),
    )
    .await;

    let cart = HttpCartService::new(client(1), base);
    let err = cart.get_cart("tok").await.unwrap_err();

    assert_eq!(
        err,
        GatewayError::Status {
            service: "cart",
            code: 503
        }
    );
    assert_eq!(stub.hits(), 2);
}

#[tokio::test]
async fn test_catalog_decodes_product_snapshot() {
    let stub = Stub::default();
    let base = serve(
        Router::new()
            .route("/product/{id}", get(product_handler))
            .with_state(stub.clone()),
    )
    .await;
    let catalog = HttpCatalogService::new(client(0), base);

    let lamp = catalog.get_product(&ProductId::new("P1")).await.unwrap();
    assert_eq!(lamp.id, ProductId::new("P1"));
    assert_eq!(lamp.title, "Desk Lamp");
    assert_eq!(lamp.price.to_money(), Some(Money::new(100, Currency::Inr)));
    assert_eq!(lamp.stock, Some(10));

    let chair = catalog.get_product(&ProductId::new("P2")).await.unwrap();
    assert_eq!(chair.stock, Some(0));

    // Fractional amounts and a missing stock field are valid catalog data.
    let tea = catalog.get_product(&ProductId::new("P3")).await.unwrap();
    assert_eq!(tea.price.amount.as_f64(), Some(99.5));
    assert_eq!(tea.price.to_money(), None);
    assert_eq!(tea.stock, None);
}

#[tokio::test]
async fn test_catalog_maps_not_found_without_retry() {
    let stub = Stub::default();
    let base = serve(
        Router::new()
            .route("/product/{id}", get(product_handler))
            .with_state(stub.clone()),
    )
    .await;
    let catalog = HttpCatalogService::new(client(2), base);

    let err = catalog
        .get_product(&ProductId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound { service: "catalog", .. }));
    assert!(!err.is_retryable());
    assert_eq!(stub.hits(), 1);
}

#[tokio::test]
async fn test_slow_collaborator_times_out() {
    let base = serve(
        Router::new()
            .route("/product/{id}", get(product_handler))
            .with_state(Stub::default()),
    )
    .await;
    let catalog = HttpCatalogService::new(client(0), base);

    let err = catalog
        .get_product(&ProductId::new("slow"))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Timeout { service: "catalog" });
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_undecodable_body_is_decode_error() {
    let base = serve(
        Router::new()
            .route("/product/{id}", get(product_handler))
            .with_state(Stub::default()),
    )
    .await;
    let catalog = HttpCatalogService::new(client(0), base);

    let err = catalog
        .get_product(&ProductId::new("garbled"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Decode { service: "catalog", .. }));
}

#[tokio::test]
async fn test_unreachable_collaborator_is_unavailable() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cart = HttpCartService::new(client(0), format!("http://{addr}"));
    let err = cart.get_cart("tok").await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable { service: "cart", .. }));
}

#[tokio::test]
async fn test_provider_creates_order_with_basic_auth() {
    let stub = Stub::default();
    let base = serve(
        Router::new()
            .route("/v1/orders", post(provider_handler))
            .with_state(stub.clone()),
    )
    .await;
    let provider = HttpPaymentProvider::new(client(2), base, "key_test", "shh");

    let created = provider
        .create_order(Money::new(200, Currency::Inr), "receipt-1")
        .await
        .unwrap();

    assert_eq!(created.id, "order_ABC123");
    assert_eq!(created.amount, 200);
    assert_eq!(created.currency, Currency::Inr);
    assert_eq!(
        stub.last_auth.lock().unwrap().as_deref(),
        Some("Basic a2V5X3Rlc3Q6c2ho")
    );
    assert_eq!(
        stub.last_body.lock().unwrap().clone().unwrap(),
        json!({ "amount": 200, "currency": "INR", "receipt": "receipt-1" })
    );
}

#[tokio::test]
async fn test_provider_writes_are_never_retried() {
    let stub = Stub {
        failures_before_success: 1,
        ..Stub::default()
    };
    let base = serve(
        Router::new()
            .route("/v1/orders", post(provider_handler))
            .with_state(stub.clone()),
    )
    .await;
    let provider = HttpPaymentProvider::new(client(3), base, "key_test", "shh");

    let err = provider
        .create_order(Money::new(200, Currency::Inr), "receipt-1")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        GatewayError::Status {
            service: "payment_provider",
            code: 503
        }
    );
    assert_eq!(stub.hits(), 1);
}

#[test]
fn test_provider_debug_hides_secret() {
    let provider = HttpPaymentProvider::new(client(0), "http://localhost", "key_test", "shh");
    let rendered = format!("{provider:?}");
    assert!(rendered.contains("key_test"));
    assert!(!rendered.contains("shh"));
}
