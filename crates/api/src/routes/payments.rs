//! Payment endpoints: synchronous decision, fact-driven processing and lookup.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{OrderId, Payment};
use saga::{DecideRequest, Decision, PaymentOutcome};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Optional body of `POST /payments/{orderId}/process`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[serde(alias = "paymentMethod")]
    pub method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub message: String,
    pub payment: Payment,
}

/// POST /payments: decide the payment for an order and settle it.
///
/// `201` with the new payment, `200` with the existing one if the order was
/// already decided. A settlement failure after the decision keeps the
/// payment in the error body.
#[tracing::instrument(skip(state, payload))]
pub async fn decide(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DecideRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let outcome = state.saga.decide_and_settle(&req).await?;

    let status = if outcome.decision.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(respond(outcome, |payment| (status, Json(payment)).into_response()))
}

/// POST /payments/{orderId}/process: decide the pending payment registered
/// from the order-created fact and settle it.
///
/// `200 {message, payment}` on a fresh decision, `400 {message, payment}` if
/// the payment had already been processed.
#[tracing::instrument(skip(state, body))]
pub async fn process(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let order_id: OrderId = order_id.parse()?;
    let req: ProcessRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ProcessRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let outcome = state.saga.process_and_settle(order_id, req.method).await?;

    let (status, message) = match &outcome.decision {
        Decision::Recorded(_) => (StatusCode::OK, "Payment processed"),
        Decision::AlreadyRecorded(_) => (StatusCode::BAD_REQUEST, "Payment was already processed"),
    };
    Ok(respond(outcome, |payment| {
        let body = ProcessResponse {
            message: message.to_string(),
            payment,
        };
        (status, Json(body)).into_response()
    }))
}

/// GET /payments/{orderId}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let order_id: OrderId = order_id.parse()?;
    Ok(Json(state.saga.payment(order_id).await?))
}

/// Renders `on_settled` if settlement succeeded, otherwise the settlement
/// error with the recorded payment attached.
fn respond(outcome: PaymentOutcome, on_settled: impl FnOnce(Payment) -> Response) -> Response {
    let PaymentOutcome {
        decision,
        settlement,
    } = outcome;
    let payment = decision.into_payment();

    match settlement {
        Ok(_) => on_settled(payment),
        Err(err) => {
            let extra = serde_json::json!({ "payment": payment });
            ApiError::Saga(err).into_response_with(extra)
        }
    }
}
