//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Order, OrderId, OrderStatus, UserId};
use saga::{OrderLine, SagaError};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

/// Body of `POST /orders`. Both fields are optional on the wire so that a
/// missing user or item list is reported as a validation error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub items: Vec<OrderLine>,
}

/// Body of `PATCH /orders/{id}/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: Option<OrderStatus>,
    /// When set, the write only happens if the order is still in this status.
    pub expected: Option<OrderStatus>,
}

// -- Handlers --

/// POST /orders: validate and create an order awaiting payment.
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(req) = payload?;
    let user_id = req.user_id.ok_or_else(|| {
        SagaError::Validation("An order needs a user and at least one item".to_string())
    })?;

    let order = state.saga.create_order(user_id, req.items).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: every order, newest first.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.saga.list_orders().await?))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = id.parse()?;
    Ok(Json(state.saga.order(order_id).await?))
}

/// PATCH /orders/{id}/status: conditional status transition.
#[tracing::instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = id.parse()?;
    let Json(req) = payload?;
    let status = req
        .status
        .ok_or_else(|| SagaError::Validation("Status is required".to_string()))?;

    let order = state
        .saga
        .transition_order(order_id, req.expected, status)
        .await?;
    Ok(Json(order))
}
