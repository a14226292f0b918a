//! Xendit client against a local stand-in of the invoice API.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use order_payments::gateway::{GatewayClient, GatewayError, InvoiceRequest};
use order_payments::{XenditClient, XenditConfig};

#[derive(Clone, Default)]
struct Seen {
    authorization: Arc<Mutex<Option<String>>>,
    body: Arc<Mutex<Option<Value>>>,
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str) -> XenditClient {
    XenditClient::new(XenditConfig::new("secret", format!("{base_url}/"))).unwrap()
}

fn invoice_request() -> InvoiceRequest {
    InvoiceRequest {
        external_id: "order-15".into(),
        amount: dec!(125000),
        description: "Payment for Order 15".into(),
        payer_email: "user7@example.com".into(),
    }
}

#[tokio::test]
async fn create_invoice_posts_json_with_basic_auth() {
    let seen = Seen::default();
    let router = Router::new()
        .route(
            "/v2/invoices",
            axum::routing::post(
                |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    *seen.authorization.lock().unwrap() = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    *seen.body.lock().unwrap() = Some(body);
                    Json(json!({
                        "id": "inv_123",
                        "external_id": "order-15",
                        "status": "PENDING",
                        "invoice_url": "https://checkout.xendit.co/web/inv_123",
                        "expiry_date": "2026-10-20T10:00:00.000Z",
                        "amount": 125000
                    }))
                },
            ),
        )
        .with_state(seen.clone());
    let gateway = client(&serve(router).await);

    let invoice = gateway.create_invoice(&invoice_request()).await.unwrap();

    assert_eq!(invoice.id, "inv_123");
    assert_eq!(invoice.external_id, "order-15");
    assert_eq!(invoice.status, "PENDING");
    assert_eq!(invoice.expiry_date.to_rfc3339(), "2026-10-20T10:00:00+00:00");

    // "secret:" base64-encoded
    assert_eq!(
        seen.authorization.lock().unwrap().as_deref(),
        Some("Basic c2VjcmV0Og==")
    );
    let body = seen.body.lock().unwrap().clone().unwrap();
    assert_eq!(body["external_id"], "order-15");
    assert_eq!(body["amount"].as_f64(), Some(125000.0));
    assert_eq!(body["description"], "Payment for Order 15");
    assert_eq!(body["payer_email"], "user7@example.com");
}

#[tokio::test]
async fn non_success_keeps_status_and_body() {
    let router = Router::new().route(
        "/v2/invoices",
        axum::routing::post(|| async {
            (
                StatusCode::BAD_REQUEST,
                r#"{"error_code":"API_VALIDATION_ERROR","message":"amount too small"}"#,
            )
        }),
    );
    let gateway = client(&serve(router).await);

    let err = gateway.create_invoice(&invoice_request()).await.unwrap_err();

    match &err {
        GatewayError::Api {
            status_code,
            message,
        } => {
            assert_eq!(*status_code, 400);
            assert!(message.contains("API_VALIDATION_ERROR"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_client_error());
    assert!(!err.is_server_error());
}

#[tokio::test]
async fn unparseable_success_body_is_a_parse_error() {
    let router = Router::new().route(
        "/v2/invoices",
        axum::routing::post(|| async { Json(json!({"unexpected": true})) }),
    );
    let gateway = client(&serve(router).await);

    assert!(matches!(
        gateway.create_invoice(&invoice_request()).await,
        Err(GatewayError::Parse(_))
    ));
}

#[tokio::test]
async fn status_lookup_returns_first_listed_invoice() {
    let router = Router::new().route(
        "/v2/invoices",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            match params.get("external_id").map(String::as_str) {
                Some("order-15") => Json(json!([
                    {"id": "inv_2", "external_id": "order-15", "status": "PAID"},
                    {"id": "inv_1", "external_id": "order-15", "status": "EXPIRED"}
                ])),
                _ => Json(json!([])),
            }
        }),
    );
    let gateway = client(&serve(router).await);

    assert_eq!(gateway.check_invoice_status("order-15").await.unwrap(), "PAID");
    assert!(matches!(
        gateway.check_invoice_status("order-99").await,
        Err(GatewayError::InvoiceNotFound(id)) if id == "order-99"
    ));
}

#[tokio::test]
async fn server_errors_are_classified() {
    let router = Router::new().route(
        "/v2/invoices",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
    );
    let gateway = client(&serve(router).await);

    let err = gateway.check_invoice_status("order-15").await.unwrap_err();
    assert!(err.is_server_error());
}

#[tokio::test]
async fn unreachable_gateway_is_an_http_error() {
    // bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = client(&format!("http://{addr}"));
    assert!(matches!(
        gateway.check_invoice_status("order-15").await,
        Err(GatewayError::Http(_))
    ));
}
