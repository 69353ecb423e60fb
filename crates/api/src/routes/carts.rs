//! Cart endpoints and checkout.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::CustomerId;
use domain::{Cart, OrderState, ProductId};
use row_store::RowStore;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct SetQuantityRequest {
    /// Zero or less removes the line.
    pub quantity: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartLineResponse {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub customer_id: String,
    pub lines: Vec<CartLineResponse>,
}

impl CartResponse {
    fn new(customer_id: CustomerId, cart: Option<Cart>) -> Self {
        let lines = cart
            .map(|cart| cart.lines())
            .unwrap_or_default()
            .into_iter()
            .map(|line| CartLineResponse {
                product_id: line.product_id.to_string(),
                quantity: line.quantity,
            })
            .collect();

        Self {
            customer_id: customer_id.to_string(),
            lines,
        }
    }
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub state: OrderState,
}

// -- Handlers --

/// GET /carts/{customer}
pub async fn get<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let customer_id = parse_id::<CustomerId>("customer", &customer)?;
    let cart = state.storefront.cart(customer_id).await?;
    Ok(Json(CartResponse::new(customer_id, cart)))
}

/// DELETE /carts/{customer}
pub async fn clear<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer): Path<String>,
) -> Result<StatusCode, ApiError> {
    let customer_id = parse_id::<CustomerId>("customer", &customer)?;
    state.storefront.clear_cart(customer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /carts/{customer}/items
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let customer_id = parse_id::<CustomerId>("customer", &customer)?;
    let cart = state
        .storefront
        .add_to_cart(customer_id, &ProductId::new(req.product_id), req.quantity)
        .await?;
    Ok(Json(CartResponse::new(customer_id, Some(cart))))
}

/// PUT /carts/{customer}/items/{product}
#[tracing::instrument(skip(state, req))]
pub async fn set_quantity<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((customer, product)): Path<(String, String)>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let customer_id = parse_id::<CustomerId>("customer", &customer)?;
    let cart = state
        .storefront
        .set_cart_quantity(customer_id, &ProductId::new(product), req.quantity)
        .await?;
    Ok(Json(CartResponse::new(customer_id, cart)))
}

/// DELETE /carts/{customer}/items/{product}
pub async fn remove_item<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((customer, product)): Path<(String, String)>,
) -> Result<Json<CartResponse>, ApiError> {
    let customer_id = parse_id::<CustomerId>("customer", &customer)?;
    let cart = state
        .storefront
        .remove_from_cart(customer_id, &ProductId::new(product))
        .await?;
    Ok(Json(CartResponse::new(customer_id, cart)))
}

/// POST /carts/{customer}/checkout
///
/// Responds 409 with the short products when stock runs out.
#[tracing::instrument(skip(state))]
pub async fn checkout<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer): Path<String>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let customer_id = parse_id::<CustomerId>("customer", &customer)?;
    let order_id = state.storefront.checkout(customer_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id: order_id.to_string(),
            state: OrderState::Reserved,
        }),
    ))
}
