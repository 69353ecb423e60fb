//! Caller-facing entry point for the whole engine.
//!
//! [`Storefront`] wires the ledger, catalog, carts, reservations and order
//! lifecycle onto one row store and adds the payment gateway on top. The HTTP
//! layer and the tests talk to this type only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{CustomerId, OrderId};
use domain::{
    CancelReason, Cart, CartStore, Clock, Confirmation, DomainError, Money, Order, OrderError,
    OrderLifecycleManager, OrderState, PaymentRef, Product, ProductCatalog, ProductId,
    ProductStock, ReservationManager, StockLedger, SystemClock,
};
use row_store::{RowStore, StoreError};
use serde::Serialize;

use crate::config::{EngineConfig, MAX_SWEEP_INTERVAL};
use crate::error::{EngineError, Result};
use crate::services::{GatewayError, PaymentGateway, PaymentNotification, PaymentOutcome, PaymentRequest};
use crate::sweeper::ExpirySweeper;

/// How a payment notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// The notification moved the order.
    Applied { state: OrderState },
    /// The same notification was already applied.
    Duplicate { state: OrderState },
    /// The order had already moved on; nothing changed.
    Ignored { state: OrderState },
}

impl CallbackOutcome {
    pub fn state(&self) -> OrderState {
        match self {
            CallbackOutcome::Applied { state }
            | CallbackOutcome::Duplicate { state }
            | CallbackOutcome::Ignored { state } => *state,
        }
    }
}

pub struct Storefront<S> {
    store: S,
    ledger: StockLedger<S>,
    catalog: ProductCatalog<S>,
    carts: CartStore<S>,
    lifecycle: OrderLifecycleManager<S>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S: Clone> Clone for Storefront<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            catalog: self.catalog.clone(),
            carts: self.carts.clone(),
            lifecycle: self.lifecycle.clone(),
            gateway: self.gateway.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> Storefront<S>
where
    S: RowStore + Clone + 'static,
{
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>, config: EngineConfig) -> Self {
        Self::with_clock(store, gateway, config, Arc::new(SystemClock))
    }

    /// Builds a storefront that reads time from `clock`; tests pass a
    /// [`domain::ManualClock`] here.
    pub fn with_clock(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = StockLedger::new(store.clone());
        let catalog = ProductCatalog::new(store.clone());
        let carts = CartStore::new(store.clone(), ledger.clone(), clock.clone());
        let reservations = ReservationManager::new(
            store.clone(),
            ledger.clone(),
            clock.clone(),
            config.reservation_ttl_delta(),
        );
        let lifecycle = OrderLifecycleManager::new(
            store.clone(),
            catalog.clone(),
            carts.clone(),
            reservations,
            clock.clone(),
        );

        Self {
            store,
            ledger,
            catalog,
            carts,
            lifecycle,
            gateway,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StockLedger<S> {
        &self.ledger
    }

    pub fn lifecycle(&self) -> &OrderLifecycleManager<S> {
        &self.lifecycle
    }

    /// An expiry sweeper over this storefront's orders, ticking at the
    /// configured interval.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        self.sweeper_every(self.config.sweep_interval.min(MAX_SWEEP_INTERVAL))
    }

    pub fn sweeper_every(&self, interval: Duration) -> ExpirySweeper<S> {
        ExpirySweeper::new(self.lifecycle.clone(), self.clock.clone(), interval)
    }

    // Catalog and stock

    /// Adds a product to the catalog together with its initial stock.
    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add_product(&self, product: Product, initial_stock: u32) -> Result<Product> {
        let ops = vec![
            self.catalog.insert_op(&product)?,
            self.ledger.register_op(&product.id, initial_stock)?,
        ];

        match self.store.transaction(ops).await {
            Ok(_) => {
                tracing::info!(initial_stock, "product added");
                Ok(product)
            }
            Err(StoreError::AlreadyExists { .. }) => {
                Err(DomainError::ProductAlreadyExists(product.id).into())
            }
            Err(e) => Err(DomainError::from(e).into()),
        }
    }

    pub async fn products(&self) -> Result<Vec<Product>> {
        Ok(self.catalog.all().await?)
    }

    pub async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<ProductStock> {
        Ok(self.ledger.restock(product_id, quantity).await?)
    }

    pub async fn stock_level(&self, product_id: &ProductId) -> Result<ProductStock> {
        self.ledger
            .get(product_id)
            .await?
            .ok_or_else(|| DomainError::UnknownProduct(product_id.clone()).into())
    }

    // Carts

    pub async fn add_to_cart(
        &self,
        customer_id: CustomerId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        Ok(self.carts.add_item(customer_id, product_id, quantity).await?)
    }

    pub async fn remove_from_cart(
        &self,
        customer_id: CustomerId,
        product_id: &ProductId,
    ) -> Result<Option<Cart>> {
        Ok(self.carts.remove_item(customer_id, product_id).await?)
    }

    pub async fn set_cart_quantity(
        &self,
        customer_id: CustomerId,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<Option<Cart>> {
        Ok(self
            .carts
            .set_quantity(customer_id, product_id, quantity)
            .await?)
    }

    pub async fn cart(&self, customer_id: CustomerId) -> Result<Option<Cart>> {
        Ok(self.carts.get(customer_id).await?)
    }

    pub async fn clear_cart(&self, customer_id: CustomerId) -> Result<()> {
        Ok(self.carts.clear(customer_id).await?)
    }

    // Orders

    /// Places an order for everything in the customer's cart and reserves
    /// its stock.
    ///
    /// Fails with `InsufficientStock` naming the short products when any
    /// line cannot be met; nothing is held and the cart is left as it was.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, customer_id: CustomerId) -> Result<OrderId> {
        metrics::counter!("checkout_total").increment(1);
        let started = Instant::now();

        let result = async {
            let snapshot = self.carts.snapshot(customer_id).await?;
            self.lifecycle.place_order(&snapshot).await
        }
        .await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(order) => Ok(order.id()),
            Err(e) => {
                metrics::counter!("checkout_failed_total", "reason" => failure_reason(&e))
                    .increment(1);
                tracing::info!(error = %e, "checkout failed");
                Err(e.into())
            }
        }
    }

    pub async fn order_status(&self, order_id: OrderId) -> Result<OrderState> {
        Ok(self.lifecycle.require_order(order_id).await?.state())
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        Ok(self.lifecycle.require_order(order_id).await?)
    }

    /// Asks the gateway to collect payment for a reserved order.
    ///
    /// Calling this again for an order that already has a payment in flight
    /// returns that payment's reference instead of starting another. When
    /// the gateway rejects the request the order is cancelled and its stock
    /// released.
    #[tracing::instrument(skip(self))]
    pub async fn begin_payment(&self, order_id: OrderId) -> Result<PaymentRef> {
        let order = self.lifecycle.require_order(order_id).await?;
        if order.state() != OrderState::Reserved {
            return Err(DomainError::from(OrderError::InvalidTransition {
                order_id,
                current_state: order.state(),
                action: "start payment",
            })
            .into());
        }
        if let Some(existing) = order.payment_ref() {
            return Ok(existing.clone());
        }

        let request = PaymentRequest {
            order_id,
            amount: order.total(),
            currency: self.config.currency.clone(),
        };

        match self.gateway.initiate(request).await {
            Ok(reference) => self.record_started_payment(&order, reference).await,
            Err(GatewayError::Rejected(reason)) => {
                tracing::warn!(%reason, "gateway rejected payment");
                match self.lifecycle.cancel(order_id, CancelReason::PaymentFailed).await {
                    Ok(_) => {}
                    Err(e) if e.is_invalid_transition() => {
                        tracing::info!("order left reserved state while payment was rejected");
                    }
                    Err(e) => return Err(e.into()),
                }
                Err(EngineError::PaymentRejected { order_id, reason })
            }
            Err(e) => {
                tracing::error!(error = %e, "payment gateway unavailable");
                Err(e.into())
            }
        }
    }

    /// Stores the reference of a payment the gateway just started.
    ///
    /// Two concurrent calls may each have started a payment. The one that
    /// recorded first wins; the other voids its own payment and hands back
    /// the winner's reference.
    async fn record_started_payment(&self, order: &Order, reference: PaymentRef) -> Result<PaymentRef> {
        let order_id = order.id();
        match self
            .lifecycle
            .record_payment_attempt(order_id, reference.clone())
            .await
        {
            Ok(recorded) if recorded.state() == OrderState::Reserved => {
                tracing::info!(payment_ref = %reference, "payment initiated");
                Ok(reference)
            }
            Ok(recorded) => {
                // Kept on the order so a late success can still be returned.
                tracing::info!(payment_ref = %reference, state = %recorded.state(), "order moved on while payment was starting");
                Err(DomainError::from(OrderError::InvalidTransition {
                    order_id,
                    current_state: recorded.state(),
                    action: "start payment",
                })
                .into())
            }
            Err(DomainError::Order(OrderError::PaymentMismatch { recorded, .. })) => {
                self.void_payment(&reference, order.total()).await;
                Ok(recorded)
            }
            Err(e) if e.is_invalid_transition() => {
                let current = self.lifecycle.require_order(order_id).await?;
                if current.payment_ref() != Some(&reference) {
                    self.void_payment(&reference, order.total()).await;
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancels a payment that was started but will never be recorded.
    async fn void_payment(&self, reference: &PaymentRef, amount: Money) {
        tracing::warn!(payment_ref = %reference, "voiding payment that lost the race to be recorded");
        metrics::counter!("payments_voided_total").increment(1);
        if let Err(e) = self.gateway.refund(reference, amount).await {
            tracing::error!(payment_ref = %reference, error = %e, "failed to void payment");
        }
    }

    /// Applies an asynchronous payment notification.
    ///
    /// Safe to call any number of times with the same notification and from
    /// any task. A notification for an order that already moved on is
    /// ignored; a success arriving for an order that was cancelled meanwhile
    /// has its money returned. A reference that contradicts the order's
    /// recorded payment is an integrity alert and is returned as an error.
    #[tracing::instrument(skip(self, notification), fields(order_id = %notification.order_id, payment_ref = %notification.payment_ref))]
    pub async fn payment_callback(&self, notification: PaymentNotification) -> Result<CallbackOutcome> {
        let PaymentNotification {
            order_id,
            payment_ref,
            outcome,
        } = notification;

        let result = match &outcome {
            PaymentOutcome::Succeeded => self
                .lifecycle
                .confirm_payment(order_id, payment_ref.clone())
                .await
                .map(|(order, confirmation)| match confirmation {
                    Confirmation::Applied => CallbackOutcome::Applied {
                        state: order.state(),
                    },
                    Confirmation::Duplicate => CallbackOutcome::Duplicate {
                        state: order.state(),
                    },
                }),
            PaymentOutcome::Failed { reason } => {
                tracing::info!(%reason, "payment failed");
                self.lifecycle
                    .fail_payment(order_id, payment_ref.clone())
                    .await
                    .map(|order| CallbackOutcome::Applied {
                        state: order.state(),
                    })
            }
        };

        match result {
            Ok(handled) => Ok(handled),
            Err(e) if e.is_invalid_transition() => {
                if outcome == PaymentOutcome::Succeeded {
                    self.return_late_payment(order_id, &payment_ref).await?;
                }
                let order = self.lifecycle.require_order(order_id).await?;
                tracing::info!(state = %order.state(), "payment notification arrived too late");
                Ok(CallbackOutcome::Ignored {
                    state: order.state(),
                })
            }
            Err(e) if e.is_payment_mismatch() => Err(Self::payment_mismatch(e)),
            Err(e) => Err(e.into()),
        }
    }

    fn payment_mismatch(error: DomainError) -> EngineError {
        metrics::counter!("payment_mismatch_total").increment(1);
        tracing::error!(error = %error, "payment reference mismatch");
        error.into()
    }

    /// Gives back money captured for an order that was cancelled before the
    /// confirmation arrived.
    ///
    /// Only the payment recorded on the order is ever sent back, and only
    /// once: the order is marked first and the gateway is called only by
    /// the caller whose mark landed.
    async fn return_late_payment(&self, order_id: OrderId, payment_ref: &PaymentRef) -> Result<()> {
        let order = match self
            .lifecycle
            .record_late_refund(order_id, payment_ref.clone())
            .await
        {
            Ok((order, true)) => order,
            Ok((_, false)) => {
                tracing::debug!(%payment_ref, "late payment already refunded");
                return Ok(());
            }
            // Not cancelled, or cancelled by a refund that already returned the money.
            Err(e) if e.is_invalid_transition() => return Ok(()),
            Err(e) if e.is_payment_mismatch() => return Err(Self::payment_mismatch(e)),
            Err(DomainError::Order(OrderError::UnverifiedPayment { .. })) => {
                metrics::counter!("late_payments_unverified_total").increment(1);
                tracing::error!(%payment_ref, "success reported for a payment this order never recorded, not refunding");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::warn!(%payment_ref, "payment succeeded for a cancelled order, refunding");
        metrics::counter!("late_payments_refunded_total").increment(1);
        self.gateway
            .refund(payment_ref, order.total())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "refund of late payment failed");
                EngineError::from(e)
            })
    }

    pub async fn fulfill(&self, order_id: OrderId) -> Result<Order> {
        Ok(self.lifecycle.fulfill(order_id).await?)
    }

    /// Cancels an unpaid order at the customer's request.
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        Ok(self
            .lifecycle
            .cancel(order_id, CancelReason::CustomerRequest)
            .await?)
    }

    /// Cancels a paid order, releases its stock and returns the money.
    ///
    /// The order transition happens first so the gateway refund is issued at
    /// most once. A gateway failure after that is logged and returned, and
    /// needs manual follow-up.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_id: OrderId) -> Result<Order> {
        let order = self.lifecycle.refund(order_id).await?;

        if let Some(reference) = order.payment_ref() {
            if let Err(e) = self.gateway.refund(reference, order.total()).await {
                tracing::error!(payment_ref = %reference, error = %e, "gateway refund failed");
                return Err(e.into());
            }
        }
        Ok(order)
    }
}

fn failure_reason(error: &DomainError) -> &'static str {
    match error {
        DomainError::InsufficientStock { .. } => "insufficient_stock",
        DomainError::EmptyCart(_) => "empty_cart",
        DomainError::UnknownProduct(_) => "unknown_product",
        DomainError::ContentionExhausted { .. } => "contention",
        _ => "other",
    }
}
