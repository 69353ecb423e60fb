//! The order record and its guarded transitions.
//!
//! Every mutating method checks the state guard first and changes nothing
//! when it refuses. The lifecycle manager runs these methods inside a
//! compare-and-swap loop, so each one must be a pure function of the order
//! and its arguments.

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ReservationId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderState};
use crate::value_objects::{Money, PaymentRef, ProductId};

/// A purchased product with its price captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// `None` when the line total does not fit in [`Money`].
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price.checked_times(self.quantity)
    }
}

/// Why an order ended up cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    CustomerRequest,
    ReservationExpired,
    PaymentFailed,
    Refunded,
}

/// When each transition happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub created_at: DateTime<Utc>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set when a payment that succeeded after cancellation was sent back.
    #[serde(default)]
    pub late_refund_at: Option<DateTime<Utc>>,
}

/// Result of applying a payment confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The order moved to paid.
    Applied,
    /// The same payment had already been applied; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    lines: Vec<OrderLine>,
    total: Money,
    state: OrderState,
    reservation_id: Option<ReservationId>,
    reservation_expires_at: Option<DateTime<Utc>>,
    payment_ref: Option<PaymentRef>,
    cancel_reason: Option<CancelReason>,
    timeline: Timeline,
}

impl Order {
    pub fn create(
        id: OrderId,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        let total = lines
            .iter()
            .try_fold(Money::zero(), |total, line| {
                total.checked_add(line.total_price()?)
            })
            .ok_or(OrderError::AmountOverflow { order_id: id })?;

        Ok(Self {
            id,
            customer_id,
            lines,
            total,
            state: OrderState::Created,
            reservation_id: None,
            reservation_expires_at: None,
            payment_ref: None,
            cancel_reason: None,
            timeline: Timeline {
                created_at: now,
                reserved_at: None,
                paid_at: None,
                fulfilled_at: None,
                cancelled_at: None,
                late_refund_at: None,
            },
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        self.reservation_id
    }

    pub fn reservation_expires_at(&self) -> Option<DateTime<Utc>> {
        self.reservation_expires_at
    }

    pub fn payment_ref(&self) -> Option<&PaymentRef> {
        self.payment_ref.as_ref()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// True when the order still holds a reservation whose deadline has passed.
    pub fn is_reservation_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == OrderState::Reserved
            && self
                .reservation_expires_at
                .is_some_and(|expires_at| now >= expires_at)
    }

    fn guard(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                order_id: self.id,
                current_state: self.state,
                action,
            })
        }
    }

    /// Checks `reference` against a payment already recorded on the order.
    fn check_payment_ref(&self, reference: &PaymentRef) -> Result<(), OrderError> {
        match &self.payment_ref {
            Some(recorded) if recorded != reference => Err(OrderError::PaymentMismatch {
                order_id: self.id,
                recorded: recorded.clone(),
                received: reference.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub fn mark_reserved(
        &mut self,
        reservation_id: ReservationId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.guard(self.state.can_reserve(), "reserve")?;
        self.state = OrderState::Reserved;
        self.reservation_id = Some(reservation_id);
        self.reservation_expires_at = Some(expires_at);
        self.timeline.reserved_at = Some(now);
        Ok(())
    }

    /// Remembers the gateway reference of a payment that has been started.
    ///
    /// An order cancelled before any payment was recorded still takes the
    /// reference, so that a success arriving afterwards can be verified and
    /// sent back.
    pub fn record_payment_attempt(&mut self, reference: PaymentRef) -> Result<(), OrderError> {
        let cancelled_unpaid = self.state == OrderState::Cancelled && self.payment_ref.is_none();
        self.guard(
            self.state.can_confirm_payment() || cancelled_unpaid,
            "start payment",
        )?;
        self.check_payment_ref(&reference)?;
        self.payment_ref = Some(reference);
        Ok(())
    }

    /// Applies a successful payment.
    ///
    /// The first confirmation wins. A repeat of that same confirmation
    /// changes nothing and reports [`Confirmation::Duplicate`]; a
    /// confirmation carrying any other reference is a mismatch.
    pub fn confirm_payment(
        &mut self,
        reference: PaymentRef,
        now: DateTime<Utc>,
    ) -> Result<Confirmation, OrderError> {
        match self.state {
            OrderState::Paid | OrderState::Fulfilled => {
                self.check_payment_ref(&reference)?;
                Ok(Confirmation::Duplicate)
            }
            state => {
                self.guard(state.can_confirm_payment(), "confirm payment")?;
                self.check_payment_ref(&reference)?;
                self.state = OrderState::Paid;
                self.payment_ref = Some(reference);
                self.timeline.paid_at = Some(now);
                Ok(Confirmation::Applied)
            }
        }
    }

    /// Cancels the order because its payment failed.
    pub fn fail_payment(
        &mut self,
        reference: &PaymentRef,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.guard(self.state.can_confirm_payment(), "fail payment")?;
        self.check_payment_ref(reference)?;
        self.finish_cancelled(CancelReason::PaymentFailed, now);
        Ok(())
    }

    pub fn fulfill(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.guard(self.state.can_fulfill(), "fulfill")?;
        self.state = OrderState::Fulfilled;
        self.timeline.fulfilled_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: CancelReason, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.guard(self.state.can_cancel(), "cancel")?;
        self.finish_cancelled(reason, now);
        Ok(())
    }

    /// Cancels a reserved order whose reservation deadline has passed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.guard(self.state == OrderState::Reserved, "expire")?;
        if !self.is_reservation_expired(now) {
            return Err(OrderError::NotExpired {
                order_id: self.id,
                expires_at: self.reservation_expires_at,
            });
        }
        self.finish_cancelled(CancelReason::ReservationExpired, now);
        Ok(())
    }

    pub fn refund(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.guard(self.state.can_refund(), "refund")?;
        self.finish_cancelled(CancelReason::Refunded, now);
        Ok(())
    }

    /// Marks the recorded payment, which succeeded after the order was
    /// cancelled, as being sent back.
    ///
    /// Returns `false` when that was already done. Only the payment recorded
    /// on the order can be sent back this way.
    pub fn record_late_refund(
        &mut self,
        reference: &PaymentRef,
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        self.guard(
            self.state == OrderState::Cancelled
                && self.cancel_reason != Some(CancelReason::Refunded),
            "refund late payment",
        )?;
        if self.payment_ref.is_none() {
            return Err(OrderError::UnverifiedPayment {
                order_id: self.id,
                received: reference.clone(),
            });
        }
        self.check_payment_ref(reference)?;

        if self.timeline.late_refund_at.is_some() {
            return Ok(false);
        }
        self.timeline.late_refund_at = Some(now);
        Ok(true)
    }

    fn finish_cancelled(&mut self, reason: CancelReason, now: DateTime<Utc>) {
        self.state = OrderState::Cancelled;
        self.cancel_reason = Some(reason);
        self.timeline.cancelled_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn reserved_order(now: DateTime<Utc>) -> Order {
        let mut order = Order::create(
            OrderId::new(),
            CustomerId::new(),
            vec![
                OrderLine::new("SKU-1", "Widget", 2, Money::from_cents(1000)),
                OrderLine::new("SKU-2", "Gadget", 1, Money::from_cents(550)),
            ],
            now,
        )
        .unwrap();
        order
            .mark_reserved(ReservationId::new(), now + TimeDelta::minutes(15), now)
            .unwrap();
        order
    }

    #[test]
    fn test_create_computes_total() {
        let order = reserved_order(Utc::now());
        assert_eq!(order.total(), Money::from_cents(2550));
        assert_eq!(order.state(), OrderState::Reserved);
    }

    #[test]
    fn test_create_without_lines_fails() {
        let result = Order::create(OrderId::new(), CustomerId::new(), vec![], Utc::now());
        assert!(matches!(result, Err(OrderError::NoItems)));
    }

    #[test]
    fn test_happy_path() {
        let now = Utc::now();
        let mut order = reserved_order(now);

        let outcome = order.confirm_payment("PAY-1".into(), now).unwrap();
        assert_eq!(outcome, Confirmation::Applied);
        assert_eq!(order.state(), OrderState::Paid);
        assert_eq!(order.payment_ref().unwrap().as_str(), "PAY-1");

        order.fulfill(now).unwrap();
        assert_eq!(order.state(), OrderState::Fulfilled);
        assert!(order.timeline().fulfilled_at.is_some());
    }

    #[test]
    fn test_duplicate_confirmation_changes_nothing() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.confirm_payment("PAY-1".into(), now).unwrap();
        let before = order.clone();

        let outcome = order
            .confirm_payment("PAY-1".into(), now + TimeDelta::seconds(5))
            .unwrap();
        assert_eq!(outcome, Confirmation::Duplicate);
        assert_eq!(order, before);
    }

    #[test]
    fn test_conflicting_confirmation_is_a_mismatch() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.confirm_payment("PAY-1".into(), now).unwrap();

        let result = order.confirm_payment("PAY-2".into(), now);
        assert!(matches!(result, Err(OrderError::PaymentMismatch { .. })));
        assert_eq!(order.payment_ref().unwrap().as_str(), "PAY-1");
    }

    #[test]
    fn test_confirmation_must_match_recorded_attempt() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.record_payment_attempt("PAY-1".into()).unwrap();

        let result = order.confirm_payment("PAY-9".into(), now);
        assert!(matches!(result, Err(OrderError::PaymentMismatch { .. })));
        assert_eq!(order.state(), OrderState::Reserved);
    }

    #[test]
    fn test_cancelled_order_cannot_be_paid() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.cancel(CancelReason::CustomerRequest, now).unwrap();

        let result = order.confirm_payment("PAY-1".into(), now);
        assert!(matches!(
            result,
            Err(OrderError::InvalidTransition {
                current_state: OrderState::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_paid_order_cannot_be_cancelled_only_refunded() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.confirm_payment("PAY-1".into(), now).unwrap();

        assert!(order.cancel(CancelReason::CustomerRequest, now).is_err());

        order.refund(now).unwrap();
        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.cancel_reason(), Some(CancelReason::Refunded));
    }

    #[test]
    fn test_fulfilled_order_cannot_be_refunded() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.confirm_payment("PAY-1".into(), now).unwrap();
        order.fulfill(now).unwrap();

        assert!(order.refund(now).is_err());
        assert!(order.cancel(CancelReason::CustomerRequest, now).is_err());
    }

    #[test]
    fn test_expire_respects_deadline() {
        let now = Utc::now();
        let mut order = reserved_order(now);

        let early = order.expire(now + TimeDelta::minutes(14));
        assert!(matches!(early, Err(OrderError::NotExpired { .. })));
        assert_eq!(order.state(), OrderState::Reserved);

        order.expire(now + TimeDelta::minutes(15)).unwrap();
        assert_eq!(order.cancel_reason(), Some(CancelReason::ReservationExpired));
    }

    #[test]
    fn test_paid_order_does_not_expire() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.confirm_payment("PAY-1".into(), now).unwrap();

        let late = now + TimeDelta::hours(1);
        assert!(!order.is_reservation_expired(late));
        assert!(matches!(
            order.expire(late),
            Err(OrderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_failed_payment_cancels() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.record_payment_attempt("PAY-1".into()).unwrap();

        assert!(order.fail_payment(&"PAY-2".into(), now).is_err());
        order.fail_payment(&"PAY-1".into(), now).unwrap();
        assert_eq!(order.cancel_reason(), Some(CancelReason::PaymentFailed));
    }

    #[test]
    fn test_create_rejects_overflowing_total() {
        let order_id = OrderId::new();
        let result = Order::create(
            order_id,
            CustomerId::new(),
            vec![OrderLine::new("SKU-1", "Gold", 2, Money::from_cents(i64::MAX))],
            Utc::now(),
        );
        assert_eq!(result, Err(OrderError::AmountOverflow { order_id }));

        let result = Order::create(
            order_id,
            CustomerId::new(),
            vec![
                OrderLine::new("SKU-1", "Gold", 1, Money::from_cents(i64::MAX)),
                OrderLine::new("SKU-2", "Silver", 1, Money::from_cents(1)),
            ],
            Utc::now(),
        );
        assert_eq!(result, Err(OrderError::AmountOverflow { order_id }));
    }

    #[test]
    fn test_late_refund_only_for_recorded_payment_and_only_once() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.record_payment_attempt("PAY-1".into()).unwrap();
        order.expire(now + TimeDelta::minutes(15)).unwrap();

        let foreign = order.record_late_refund(&"PAY-2".into(), now);
        assert!(matches!(foreign, Err(OrderError::PaymentMismatch { .. })));
        assert!(order.timeline().late_refund_at.is_none());

        assert!(order.record_late_refund(&"PAY-1".into(), now).unwrap());
        assert!(!order.record_late_refund(&"PAY-1".into(), now).unwrap());
        assert_eq!(order.state(), OrderState::Cancelled);
    }

    #[test]
    fn test_late_refund_needs_a_recorded_payment() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.cancel(CancelReason::CustomerRequest, now).unwrap();

        let result = order.record_late_refund(&"PAY-1".into(), now);
        assert!(matches!(result, Err(OrderError::UnverifiedPayment { .. })));
    }

    #[test]
    fn test_late_refund_refused_for_refunded_order() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.confirm_payment("PAY-1".into(), now).unwrap();
        order.refund(now).unwrap();

        let result = order.record_late_refund(&"PAY-1".into(), now);
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_cancelled_order_still_records_its_first_payment() {
        let now = Utc::now();
        let mut order = reserved_order(now);
        order.cancel(CancelReason::CustomerRequest, now).unwrap();

        order.record_payment_attempt("PAY-1".into()).unwrap();
        assert_eq!(order.payment_ref().unwrap().as_str(), "PAY-1");
        assert_eq!(order.state(), OrderState::Cancelled);

        assert!(matches!(
            order.record_payment_attempt("PAY-2".into()),
            Err(OrderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_serialization() {
        let order = reserved_order(Utc::now());
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["state"], "reserved");

        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}
