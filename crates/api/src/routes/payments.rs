//! Payment gateway notification endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use engine::CallbackOutcome;
use engine::services::PaymentNotification;
use row_store::RowStore;

use crate::AppState;
use crate::error::ApiError;

/// POST /payments/callback
///
/// Idempotent: gateways may deliver the same notification many times.
#[tracing::instrument(skip(state, notification), fields(order_id = %notification.order_id))]
pub async fn callback<S: RowStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(notification): Json<PaymentNotification>,
) -> Result<Json<CallbackOutcome>, ApiError> {
    let outcome = state.storefront.payment_callback(notification).await?;
    Ok(Json(outcome))
}
