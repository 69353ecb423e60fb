//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► Reserved ──► Paid ──► Fulfilled
///    │            │          │
///    └────────────┴──────────┴──► Cancelled
/// ```
///
/// `Paid ──► Cancelled` is only reachable through a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Built from a cart, stock not yet held.
    #[default]
    Created,

    /// Stock is held until the reservation expires; awaiting payment.
    Reserved,

    /// Payment confirmed; held stock is waiting to ship.
    Paid,

    /// Shipped; held stock has left the building (terminal state).
    Fulfilled,

    /// Cancelled, expired, failed payment or refunded (terminal state).
    Cancelled,
}

impl OrderState {
    pub fn can_reserve(&self) -> bool {
        matches!(self, OrderState::Created)
    }

    pub fn can_confirm_payment(&self) -> bool {
        matches!(self, OrderState::Reserved)
    }

    pub fn can_fulfill(&self) -> bool {
        matches!(self, OrderState::Paid)
    }

    /// Cancellation without a refund. A paid order must be refunded instead.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderState::Created | OrderState::Reserved)
    }

    pub fn can_refund(&self) -> bool {
        matches!(self, OrderState::Paid)
    }

    /// Returns true if this order currently holds reserved stock.
    pub fn holds_stock(&self) -> bool {
        matches!(self, OrderState::Reserved | OrderState::Paid)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Fulfilled | OrderState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::Reserved => "reserved",
            OrderState::Paid => "paid",
            OrderState::Fulfilled => "fulfilled",
            OrderState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(OrderState::Created),
            "reserved" => Ok(OrderState::Reserved),
            "paid" => Ok(OrderState::Paid),
            "fulfilled" => Ok(OrderState::Fulfilled),
            "cancelled" => Ok(OrderState::Cancelled),
            other => Err(format!("unknown order state: {other}")),
        }
    }
}
