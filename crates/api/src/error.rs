//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use engine::EngineError;
use engine::services::GatewayError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Error raised by the storefront.
    Engine(EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            ApiError::Engine(EngineError::Domain(err)) => domain_error_to_response(err),
            ApiError::Engine(err) => engine_error_to_response(err),
        }
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn domain_error_to_response(err: DomainError) -> Response {
    let message = err.to_string();
    match err {
        DomainError::InsufficientStock { shortages } => {
            let body = serde_json::json!({ "error": message, "shortages": shortages });
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        DomainError::Order(OrderError::NoItems | OrderError::AmountOverflow { .. }) => {
            error_body(StatusCode::BAD_REQUEST, message)
        }
        DomainError::Order(_) | DomainError::ProductAlreadyExists(_) => {
            error_body(StatusCode::CONFLICT, message)
        }
        DomainError::UnknownProduct(_)
        | DomainError::OrderNotFound(_)
        | DomainError::ReservationNotFound(_) => error_body(StatusCode::NOT_FOUND, message),
        DomainError::InvalidQuantity { .. }
        | DomainError::InvalidPrice { .. }
        | DomainError::EmptyCart(_) => error_body(StatusCode::BAD_REQUEST, message),
        DomainError::ContentionExhausted { .. } => {
            tracing::warn!(error = %message, "write contention exhausted retries");
            error_body(StatusCode::SERVICE_UNAVAILABLE, message)
        }
        DomainError::InvariantViolation { .. }
        | DomainError::ReservationTtlOutOfRange { .. }
        | DomainError::Store(_)
        | DomainError::Serialization(_) => {
            tracing::error!(error = %message, "internal server error");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

fn engine_error_to_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::PaymentRejected { .. } => StatusCode::PAYMENT_REQUIRED,
        EngineError::Gateway(GatewayError::Rejected(_) | GatewayError::Unavailable(_)) => {
            StatusCode::BAD_GATEWAY
        }
        EngineError::Domain(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, err.to_string())
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Engine(EngineError::Domain(err))
    }
}

#[cfg(test)]
mod tests {
    use common::OrderId;
    use domain::{OrderState, ProductId, Shortage};

    use super::*;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        let order_id = OrderId::new();

        assert_eq!(
            status_of(DomainError::InsufficientStock {
                shortages: vec![Shortage {
                    product_id: ProductId::new("A"),
                    requested: 2,
                    available: 1,
                }],
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DomainError::Order(OrderError::InvalidTransition {
                order_id,
                current_state: OrderState::Cancelled,
                action: "fulfill",
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(DomainError::OrderNotFound(order_id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(DomainError::Order(OrderError::AmountOverflow { order_id })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::InvalidQuantity { quantity: 0 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::InvariantViolation {
                entity: "stock A".to_string(),
                detail: "reserved underflow".to_string(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(EngineError::Gateway(GatewayError::Unavailable("timeout".to_string()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(EngineError::PaymentRejected {
                order_id,
                reason: "declined".to_string(),
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(ApiError::BadRequest("bad id".to_string())),
            StatusCode::BAD_REQUEST
        );
    }
}
