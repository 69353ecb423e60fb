//! Orders and their lifecycle.

mod lifecycle;
mod model;
mod state;

pub use lifecycle::{ORDERS_TABLE, OrderLifecycleManager};
pub use model::{CancelReason, Confirmation, Order, OrderLine, Timeline};
pub use state::OrderState;

use chrono::{DateTime, Utc};
use common::OrderId;
use thiserror::Error;

use crate::value_objects::PaymentRef;

/// Errors raised by the order state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    /// The order's current state does not allow the requested action.
    #[error("Invalid transition for order {order_id}: cannot {action} from {current_state} state")]
    InvalidTransition {
        order_id: OrderId,
        current_state: OrderState,
        action: &'static str,
    },

    /// A payment reference disagrees with the one already on the order.
    #[error("Payment mismatch for order {order_id}: recorded {recorded}, received {received}")]
    PaymentMismatch {
        order_id: OrderId,
        recorded: PaymentRef,
        received: PaymentRef,
    },

    #[error("Reservation for order {order_id} has not expired (expires at {expires_at:?})")]
    NotExpired {
        order_id: OrderId,
        expires_at: Option<DateTime<Utc>>,
    },

    /// A success notification arrived for an order that never recorded a
    /// payment, so the reference cannot be checked.
    #[error("No payment recorded for order {order_id}, cannot verify {received}")]
    UnverifiedPayment {
        order_id: OrderId,
        received: PaymentRef,
    },

    /// Line totals do not fit in the money type.
    #[error("Total of order {order_id} overflows")]
    AmountOverflow { order_id: OrderId },

    #[error("Order has no items")]
    NoItems,
}
