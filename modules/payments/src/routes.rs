use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::PaymentError;
use crate::invoice_pdf::InvoiceService;
use crate::metrics::Metrics;
use crate::webhook::{WebhookPayload, WebhookProcessor, CALLBACK_TOKEN_HEADER};

#[derive(Clone)]
pub struct AppState {
    pub webhook: Arc<WebhookProcessor>,
    pub invoices: Arc<InvoiceService>,
    pub metrics: Metrics,
}

pub fn payments_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/payment/webhook", post(payment_webhook))
        .route("/v1/payment/invoice/{order_id}/pdf", get(download_invoice))
        .route("/api/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// POST /v1/payment/webhook - gateway payment notification
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, PaymentError> {
    let token = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    state.webhook.verify_token(token)?;

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| PaymentError::Validation(format!("invalid webhook body: {e}")))?;

    state.webhook.handle(payload).await?;

    Ok(Json(json!({ "message": "Success." })))
}

/// GET /v1/payment/invoice/{order_id}/pdf - invoice download
async fn download_invoice(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Response, PaymentError> {
    let path = state.invoices.download_invoice(order_id).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| PaymentError::Render(format!("{}: {}", path.display(), e)))?;

    let disposition = format!("attachment; filename=\"invoice_{order_id}.pdf\"");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "module": "order-payments",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics error: {e}")),
    }
}
