//! Order lookup and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{CancelReason, Order, OrderState};
use row_store::RowStore;
use serde::Serialize;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub state: OrderState,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub payment_ref: Option<String>,
    pub cancel_reason: Option<CancelReason>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            customer_id: order.customer_id().to_string(),
            state: order.state(),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total().cents(),
            reservation_expires_at: order.reservation_expires_at(),
            payment_ref: order.payment_ref().map(ToString::to_string),
            cancel_reason: order.cancel_reason(),
        }
    }
}

#[derive(Serialize)]
pub struct PaymentStartedResponse {
    pub order_id: String,
    pub payment_ref: String,
}

// -- Handlers --

/// GET /orders/{id}
pub async fn get<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id::<OrderId>("order", &id)?;
    let order = state.storefront.get_order(order_id).await?;
    Ok(Json((&order).into()))
}

/// POST /orders/{id}/payment
#[tracing::instrument(skip(state))]
pub async fn begin_payment<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentStartedResponse>, ApiError> {
    let order_id = parse_id::<OrderId>("order", &id)?;
    let payment_ref = state.storefront.begin_payment(order_id).await?;

    Ok(Json(PaymentStartedResponse {
        order_id: order_id.to_string(),
        payment_ref: payment_ref.to_string(),
    }))
}

/// POST /orders/{id}/fulfill
#[tracing::instrument(skip(state))]
pub async fn fulfill<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id::<OrderId>("order", &id)?;
    let order = state.storefront.fulfill(order_id).await?;
    Ok(Json((&order).into()))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id::<OrderId>("order", &id)?;
    let order = state.storefront.cancel_order(order_id).await?;
    Ok(Json((&order).into()))
}

/// POST /orders/{id}/refund
#[tracing::instrument(skip(state))]
pub async fn refund<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id::<OrderId>("order", &id)?;
    let order = state.storefront.refund(order_id).await?;
    Ok(Json((&order).into()))
}
