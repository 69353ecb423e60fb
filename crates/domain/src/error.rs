//! Domain error types.

use common::{CustomerId, OrderId, ReservationId};
use row_store::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::order::OrderError;
use crate::value_objects::ProductId;

/// One product that could not be reserved in the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortage {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

impl std::fmt::Display for Shortage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (requested {}, available {})",
            self.product_id, self.requested, self.available
        )
    }
}

fn describe(shortages: &[Shortage]) -> String {
    shortages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A reservation could not be satisfied.
    #[error("Insufficient stock: {}", describe(.shortages))]
    InsufficientStock { shortages: Vec<Shortage> },

    /// An error raised by the order state machine.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Stored state contradicts itself. Always a bug, never a user error.
    #[error("Invariant violated on {entity}: {detail}")]
    InvariantViolation { entity: String, detail: String },

    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    #[error("Product already exists: {0}")]
    ProductAlreadyExists(ProductId),

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    #[error("Invalid price: {cents} cents (must be greater than 0)")]
    InvalidPrice { cents: i64 },

    #[error("Cart is empty for customer {0}")]
    EmptyCart(CustomerId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The configured hold time cannot be added to the current time.
    #[error("Reservation TTL of {ttl_seconds}s reaches past the representable time range")]
    ReservationTtlOutOfRange { ttl_seconds: i64 },

    /// A read / decide / write loop kept losing to concurrent writers.
    #[error("Gave up writing {table}/{key} after {attempts} conflicting attempts")]
    ContentionExhausted {
        table: &'static str,
        key: String,
        attempts: u32,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub(crate) fn invariant(entity: impl std::fmt::Display, detail: impl Into<String>) -> Self {
        DomainError::InvariantViolation {
            entity: entity.to_string(),
            detail: detail.into(),
        }
    }

    /// True when an order transition was refused by the state machine.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, DomainError::Order(OrderError::InvalidTransition { .. }))
    }

    pub fn is_payment_mismatch(&self) -> bool {
        matches!(self, DomainError::Order(OrderError::PaymentMismatch { .. }))
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, DomainError::InsufficientStock { .. })
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, DomainError::InvariantViolation { .. })
    }

    /// True for missing orders, reservations and products.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::OrderNotFound(_)
                | DomainError::ReservationNotFound(_)
                | DomainError::UnknownProduct(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_names_every_product() {
        let err = DomainError::InsufficientStock {
            shortages: vec![
                Shortage {
                    product_id: ProductId::new("SKU-1"),
                    requested: 2,
                    available: 1,
                },
                Shortage {
                    product_id: ProductId::new("SKU-2"),
                    requested: 5,
                    available: 0,
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("SKU-1 (requested 2, available 1)"));
        assert!(message.contains("SKU-2 (requested 5, available 0)"));
        assert!(err.is_insufficient_stock());
        assert!(!err.is_invalid_transition());
    }

    #[test]
    fn test_order_errors_convert() {
        let err: DomainError = OrderError::NoItems.into();
        assert!(matches!(err, DomainError::Order(OrderError::NoItems)));
    }
}
