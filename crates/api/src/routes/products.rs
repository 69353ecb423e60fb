//! Catalog and stock endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Money, Product, ProductId, ProductStock};
use row_store::RowStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub id: String,
    pub name: String,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub initial_stock: u32,
}

#[derive(Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub unit_price_cents: i64,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name,
            unit_price_cents: product.unit_price.cents(),
        }
    }
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub available: u32,
    pub reserved: u32,
    pub on_hand: u64,
}

impl From<ProductStock> for StockResponse {
    fn from(stock: ProductStock) -> Self {
        Self {
            product_id: stock.product_id.to_string(),
            available: stock.available(),
            reserved: stock.reserved(),
            on_hand: stock.on_hand(),
        }
    }
}

// -- Handlers --

/// POST /products
#[tracing::instrument(skip(state, req), fields(product_id = %req.id))]
pub async fn create<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    if req.id.trim().is_empty() {
        return Err(ApiError::BadRequest("Product id must not be empty".to_string()));
    }

    let product = Product::new(req.id, req.name, Money::from_cents(req.unit_price_cents));
    let product = state
        .storefront
        .add_product(product, req.initial_stock)
        .await?;

    Ok((StatusCode::CREATED, Json(product.into())))
}

/// GET /products
pub async fn list<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state.storefront.products().await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// POST /products/{id}/restock
#[tracing::instrument(skip(state, req))]
pub async fn restock<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<RestockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let stock = state
        .storefront
        .restock(&ProductId::new(id), req.quantity)
        .await?;
    Ok(Json(stock.into()))
}

/// GET /products/{id}/stock
pub async fn stock<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let stock = state.storefront.stock_level(&ProductId::new(id)).await?;
    Ok(Json(stock.into()))
}
