//! Engine error types.

use common::OrderId;
use domain::DomainError;
use thiserror::Error;

use crate::services::GatewayError;

/// Errors that can occur during storefront operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The gateway refused to start a payment; the order has been cancelled.
    #[error("Payment for order {order_id} was rejected: {reason}")]
    PaymentRejected { order_id: OrderId, reason: String },

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl EngineError {
    /// Returns the wrapped domain error, if any.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
