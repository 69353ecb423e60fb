//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::OrderId;
use domain::{Money, PaymentRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request to collect money for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway declined the request outright.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The gateway could not be reached or failed internally.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Final result of a payment, as reported by the gateway's notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed { reason: String },
}

/// Asynchronous notification delivered by the gateway once a payment settles.
///
/// Gateways may deliver the same notification more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: OrderId,
    pub payment_ref: PaymentRef,
    pub outcome: PaymentOutcome,
}

/// Trait for the external payment processor.
///
/// `initiate` only starts a payment. The result arrives later as a
/// [`PaymentNotification`]; callers never block waiting for it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Starts collecting `request.amount`.
    ///
    /// The order id is the idempotency key: starting a payment for an order
    /// that already has one returns the existing reference.
    async fn initiate(&self, request: PaymentRequest) -> Result<PaymentRef, GatewayError>;

    /// Returns a payment to the customer, or voids it if it has not
    /// settled yet.
    async fn refund(&self, payment_ref: &PaymentRef, amount: Money) -> Result<(), GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    payments: HashMap<PaymentRef, PaymentRequest>,
    by_order: HashMap<OrderId, PaymentRef>,
    refunded: Vec<PaymentRef>,
    refund_calls: usize,
    next_id: u32,
    fail_on_initiate: Option<String>,
}

/// In-memory payment gateway for tests and local runs.
///
/// Accepts every request unless told otherwise and never sends
/// notifications by itself; tests deliver them explicitly.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every following `initiate` call fail with `Rejected(reason)`;
    /// `None` restores normal behavior.
    pub fn set_fail_on_initiate(&self, reason: Option<&str>) {
        self.state().fail_on_initiate = reason.map(str::to_string);
    }

    pub fn payment_count(&self) -> usize {
        self.state().payments.len()
    }

    pub fn request_for(&self, payment_ref: &PaymentRef) -> Option<PaymentRequest> {
        self.state().payments.get(payment_ref).cloned()
    }

    pub fn was_refunded(&self, payment_ref: &PaymentRef) -> bool {
        self.state().refunded.contains(payment_ref)
    }

    /// Number of accepted `refund` calls, repeats included.
    pub fn refund_calls(&self) -> usize {
        self.state().refund_calls
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(&self, request: PaymentRequest) -> Result<PaymentRef, GatewayError> {
        let mut state = self.state();

        if let Some(reason) = &state.fail_on_initiate {
            return Err(GatewayError::Rejected(reason.clone()));
        }

        if let Some(existing) = state.by_order.get(&request.order_id) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let payment_ref = PaymentRef::new(format!("PAY-{:04}", state.next_id));
        state.by_order.insert(request.order_id, payment_ref.clone());
        state.payments.insert(payment_ref.clone(), request);
        Ok(payment_ref)
    }

    async fn refund(&self, payment_ref: &PaymentRef, _amount: Money) -> Result<(), GatewayError> {
        let mut state = self.state();
        if !state.payments.contains_key(payment_ref) {
            return Err(GatewayError::Rejected(format!("unknown payment {payment_ref}")));
        }
        state.refund_calls += 1;
        if !state.refunded.contains(payment_ref) {
            state.refunded.push(payment_ref.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: OrderId::new(),
            amount: Money::from_cents(5000),
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sequential_payment_refs() {
        let gateway = InMemoryPaymentGateway::new();

        let r1 = gateway.initiate(request()).await.unwrap();
        let r2 = gateway.initiate(request()).await.unwrap();

        assert_eq!(r1.as_str(), "PAY-0001");
        assert_eq!(r2.as_str(), "PAY-0002");
        assert_eq!(gateway.payment_count(), 2);
        assert_eq!(gateway.request_for(&r1).unwrap().currency, "USD");
    }

    #[tokio::test]
    async fn test_initiate_is_idempotent_per_order() {
        let gateway = InMemoryPaymentGateway::new();
        let request = request();

        let first = gateway.initiate(request.clone()).await.unwrap();
        let again = gateway.initiate(request).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(gateway.payment_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_initiate() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_on_initiate(Some("card declined"));

        let result = gateway.initiate(request()).await;
        assert_eq!(result, Err(GatewayError::Rejected("card declined".to_string())));
        assert_eq!(gateway.payment_count(), 0);

        gateway.set_fail_on_initiate(None);
        assert!(gateway.initiate(request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_refund_known_payment_only() {
        let gateway = InMemoryPaymentGateway::new();
        let reference = gateway.initiate(request()).await.unwrap();

        gateway.refund(&reference, Money::from_cents(5000)).await.unwrap();
        assert!(gateway.was_refunded(&reference));
        assert_eq!(gateway.refund_calls(), 1);

        let unknown = gateway
            .refund(&PaymentRef::new("PAY-9999"), Money::from_cents(1))
            .await;
        assert!(matches!(unknown, Err(GatewayError::Rejected(_))));
    }

    #[test]
    fn test_notification_wire_format() {
        let notification = PaymentNotification {
            order_id: OrderId::new(),
            payment_ref: PaymentRef::new("PAY-0001"),
            outcome: PaymentOutcome::Failed {
                reason: "insufficient funds".to_string(),
            },
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["payment_ref"], "PAY-0001");

        let back: PaymentNotification = serde_json::from_value(json).unwrap();
        assert_eq!(back, notification);
    }
}
