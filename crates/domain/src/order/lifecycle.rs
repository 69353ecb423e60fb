//! Drives orders through their lifecycle and keeps stock in step.
//!
//! Each transition is a compare-and-swap on the order row, so exactly one of
//! any set of racing transitions wins. Stock side effects run only after the
//! winning write, and go through the reservation's own settle transaction,
//! which makes them happen at most once no matter how often a caller retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::OrderId;
use row_store::RowStore;

use super::{CancelReason, Confirmation, Order, OrderError, OrderLine, OrderState};
use crate::cart::{CartSnapshot, CartStore};
use crate::catalog::ProductCatalog;
use crate::clock::Clock;
use crate::error::DomainError;
use crate::handler::{Decision, RowHandler};
use crate::reservation::ReservationManager;
use crate::value_objects::PaymentRef;

pub const ORDERS_TABLE: &str = "orders";

pub struct OrderLifecycleManager<S> {
    orders: RowHandler<S, Order>,
    catalog: ProductCatalog<S>,
    carts: CartStore<S>,
    reservations: ReservationManager<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Clone> Clone for OrderLifecycleManager<S> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            catalog: self.catalog.clone(),
            carts: self.carts.clone(),
            reservations: self.reservations.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: RowStore> OrderLifecycleManager<S> {
    pub fn new(
        store: S,
        catalog: ProductCatalog<S>,
        carts: CartStore<S>,
        reservations: ReservationManager<S>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders: RowHandler::new(store, ORDERS_TABLE),
            catalog,
            carts,
            reservations,
            clock,
        }
    }

    pub fn reservations(&self) -> &ReservationManager<S> {
        &self.reservations
    }

    /// Turns a cart snapshot into a reserved order.
    ///
    /// Prices are read from the catalog, stock is reserved for every line,
    /// and the order is stored together with its reservation in one
    /// transaction. On any failure the order does not exist, no stock stays
    /// held and the cart is untouched. After success the ordered lines are
    /// removed from the cart.
    #[tracing::instrument(skip(self, snapshot), fields(customer_id = %snapshot.customer_id))]
    pub async fn place_order(&self, snapshot: &CartSnapshot) -> Result<Order, DomainError> {
        if snapshot.is_empty() {
            return Err(DomainError::EmptyCart(snapshot.customer_id));
        }

        let mut lines = Vec::with_capacity(snapshot.lines.len());
        for line in &snapshot.lines {
            let product = self.catalog.require(&line.product_id).await?;
            lines.push(OrderLine::new(
                product.id,
                product.name,
                line.quantity,
                product.unit_price,
            ));
        }

        let now = self.clock.now();
        let mut order = Order::create(OrderId::new(), snapshot.customer_id, lines, now)?;

        let reservation = self
            .reservations
            .create_reservation(order.id(), &snapshot.lines)
            .await?;

        let persisted = async {
            order.mark_reserved(reservation.id, reservation.expires_at, now)?;
            let ops = vec![
                self.orders.insert_op(&order.id().to_string(), &order)?,
                self.reservations.insert_op(&reservation)?,
            ];
            self.orders.store().transaction(ops).await?;
            Ok::<_, DomainError>(())
        }
        .await;

        if let Err(e) = persisted {
            tracing::warn!(order_id = %order.id(), error = %e, "failed to store order, releasing stock");
            if let Err(rollback) = self.reservations.rollback(&reservation).await {
                tracing::error!(order_id = %order.id(), error = %rollback, "stock rollback failed");
            }
            return Err(e);
        }

        if let Err(e) = self.carts.consume(snapshot).await {
            tracing::warn!(order_id = %order.id(), error = %e, "order placed but cart cleanup failed");
        }

        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(order_id = %order.id(), total = %order.total(), "order placed");
        Ok(order)
    }

    /// Applies one guarded transition to an order and stores the result.
    ///
    /// Nothing is written when the transition leaves the order unchanged.
    async fn transition<R, F>(&self, order_id: OrderId, mut apply: F) -> Result<(Order, R), DomainError>
    where
        R: Send,
        F: FnMut(&mut Order, DateTime<Utc>) -> Result<R, OrderError> + Send,
    {
        let now = self.clock.now();
        self.orders
            .execute(&order_id.to_string(), |current| {
                let Some(order) = current else {
                    return Err(DomainError::OrderNotFound(order_id));
                };
                let mut next = order.clone();
                let outcome = apply(&mut next, now)?;

                if &next == order {
                    Ok(Decision::Keep((next, outcome)))
                } else {
                    Ok(Decision::Write(next.clone(), (next, outcome)))
                }
            })
            .await
    }

    /// Returns the reservation's stock to the pool after the order left a
    /// stock-holding state.
    async fn release_stock(&self, order: &Order) -> Result<(), DomainError> {
        if let Some(reservation_id) = order.reservation_id() {
            self.reservations.release_reservation(reservation_id).await?;
        }
        Ok(())
    }

    fn record_transition(order: &Order) {
        metrics::counter!("order_transitions_total", "to" => order.state().as_str()).increment(1);
        tracing::info!(order_id = %order.id(), state = %order.state(), "order transitioned");
    }

    /// Remembers which gateway payment belongs to a reserved order.
    pub async fn record_payment_attempt(
        &self,
        order_id: OrderId,
        reference: PaymentRef,
    ) -> Result<Order, DomainError> {
        let (order, ()) = self
            .transition(order_id, |order, _| {
                order.record_payment_attempt(reference.clone())
            })
            .await?;
        Ok(order)
    }

    /// Marks a reserved order paid.
    ///
    /// Repeating the confirmation that already succeeded returns
    /// [`Confirmation::Duplicate`] and changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        order_id: OrderId,
        reference: PaymentRef,
    ) -> Result<(Order, Confirmation), DomainError> {
        let (order, confirmation) = self
            .transition(order_id, |order, now| {
                order.confirm_payment(reference.clone(), now)
            })
            .await?;

        if confirmation == Confirmation::Applied {
            Self::record_transition(&order);
        } else {
            tracing::debug!(order_id = %order_id, "duplicate payment confirmation");
        }
        Ok((order, confirmation))
    }

    /// Cancels a reserved order whose payment failed.
    #[tracing::instrument(skip(self))]
    pub async fn fail_payment(
        &self,
        order_id: OrderId,
        reference: PaymentRef,
    ) -> Result<Order, DomainError> {
        let (order, ()) = self
            .transition(order_id, |order, now| order.fail_payment(&reference, now))
            .await?;
        Self::record_transition(&order);
        self.release_stock(&order).await?;
        Ok(order)
    }

    /// Ships a paid order: its held stock is removed for good.
    #[tracing::instrument(skip(self))]
    pub async fn fulfill(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let (order, ()) = self
            .transition(order_id, |order, now| order.fulfill(now))
            .await?;
        Self::record_transition(&order);

        if let Some(reservation_id) = order.reservation_id() {
            self.reservations.commit_reservation(reservation_id).await?;
        }
        Ok(order)
    }

    /// Cancels an order that has not been paid and releases its stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: OrderId,
        reason: CancelReason,
    ) -> Result<Order, DomainError> {
        let (order, ()) = self
            .transition(order_id, |order, now| order.cancel(reason, now))
            .await?;
        Self::record_transition(&order);
        self.release_stock(&order).await?;
        Ok(order)
    }

    /// Cancels a paid order and releases its stock. Returning the money is
    /// the caller's business.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let (order, ()) = self
            .transition(order_id, |order, now| order.refund(now))
            .await?;
        Self::record_transition(&order);
        self.release_stock(&order).await?;
        Ok(order)
    }

    /// Marks the payment recorded on a cancelled order as being sent back.
    ///
    /// Returns `true` only for the first call with the recorded reference,
    /// so the money goes back at most once however often the gateway
    /// repeats its notification.
    #[tracing::instrument(skip(self))]
    pub async fn record_late_refund(
        &self,
        order_id: OrderId,
        reference: PaymentRef,
    ) -> Result<(Order, bool), DomainError> {
        self.transition(order_id, |order, now| {
            order.record_late_refund(&reference, now)
        })
        .await
    }

    /// Cancels a reserved order whose reservation deadline has passed.
    ///
    /// The deadline is checked again against the current time inside the
    /// write, so a stale candidate list cannot expire an order that was paid
    /// in the meantime.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let (order, ()) = self
            .transition(order_id, |order, now| order.expire(now))
            .await?;
        Self::record_transition(&order);
        metrics::counter!("orders_expired_total").increment(1);
        self.release_stock(&order).await?;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        Ok(self
            .orders
            .load(&order_id.to_string())
            .await?
            .map(|row| row.value))
    }

    pub async fn require_order(&self, order_id: OrderId) -> Result<Order, DomainError> {
        self.get_order(order_id)
            .await?
            .ok_or(DomainError::OrderNotFound(order_id))
    }

    pub async fn list_in_state(&self, state: OrderState) -> Result<Vec<Order>, DomainError> {
        Ok(self
            .orders
            .load_all()
            .await?
            .into_iter()
            .map(|row| row.value)
            .filter(|order| order.state() == state)
            .collect())
    }

    /// Reserved orders whose reservation deadline is at or before `now`.
    pub async fn expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, DomainError> {
        Ok(self
            .list_in_state(OrderState::Reserved)
            .await?
            .into_iter()
            .filter(|order| order.is_reservation_expired(now))
            .collect())
    }
}
