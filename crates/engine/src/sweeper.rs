//! Background task that expires unpaid orders.
//!
//! Each pass lists reserved orders whose deadline has passed and expires
//! them one by one. A pass also repairs reservations that are still active
//! although their order already reached a terminal state, which can happen
//! when a process dies between the order write and the stock release.

use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::{Clock, DomainError, OrderLifecycleManager, OrderState, Reservation};
use row_store::RowStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired candidates found.
    pub scanned: usize,
    pub expired: usize,
    /// Candidates that moved on (paid, cancelled) before the sweeper got to them.
    pub lost_race: usize,
    pub failed: usize,
    /// Stale reservations released or committed to match their order.
    pub repaired: usize,
}

pub struct ExpirySweeper<S> {
    lifecycle: OrderLifecycleManager<S>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl<S> ExpirySweeper<S>
where
    S: RowStore + Clone + 'static,
{
    pub fn new(lifecycle: OrderLifecycleManager<S>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            lifecycle,
            clock,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs a single pass. Per-order failures are logged and counted, never
    /// returned.
    pub async fn sweep_once(&self) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        match self.lifecycle.expired_orders(self.clock.now()).await {
            Ok(candidates) => {
                report.scanned = candidates.len();
                for order in candidates {
                    match self.lifecycle.expire(order.id()).await {
                        Ok(_) => report.expired += 1,
                        Err(e) if is_lost_race(&e) => {
                            tracing::debug!(order_id = %order.id(), "order left reserved state before expiry");
                            report.lost_race += 1;
                        }
                        Err(e) => {
                            tracing::error!(order_id = %order.id(), error = %e, "failed to expire order");
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to list expired orders");
                report.failed += 1;
            }
        }

        self.reconcile(&mut report).await;

        metrics::counter!("sweeper_runs_total").increment(1);
        metrics::histogram!("sweep_duration_seconds").record(started.elapsed().as_secs_f64());
        if report != SweepReport::default() {
            tracing::info!(
                scanned = report.scanned,
                expired = report.expired,
                lost_race = report.lost_race,
                failed = report.failed,
                repaired = report.repaired,
                "sweep finished"
            );
        }
        report
    }

    async fn reconcile(&self, report: &mut SweepReport) {
        let active = match self.lifecycle.reservations().active().await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!(error = %e, "failed to list active reservations");
                report.failed += 1;
                return;
            }
        };

        for reservation in active {
            match self.repair(&reservation).await {
                Ok(true) => report.repaired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        reservation_id = %reservation.id,
                        error = %e,
                        "failed to repair reservation"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    /// Settles an active reservation whose order no longer holds stock.
    async fn repair(&self, reservation: &Reservation) -> Result<bool, DomainError> {
        let reservations = self.lifecycle.reservations();
        let state = self
            .lifecycle
            .get_order(reservation.order_id)
            .await?
            .map(|order| order.state());

        let settled = match state {
            Some(OrderState::Fulfilled) => reservations.commit_reservation(reservation.id).await?,
            Some(OrderState::Cancelled) => reservations.release_reservation(reservation.id).await?,
            None => {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    order_id = %reservation.order_id,
                    "active reservation without an order"
                );
                reservations.release_reservation(reservation.id).await?
            }
            Some(_) => false,
        };

        if settled {
            tracing::warn!(reservation_id = %reservation.id, "repaired stale reservation");
        }
        Ok(settled)
    }

    /// Sweeps on every tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.interval, "expiry sweeper started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep_once().await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("expiry sweeper stopped");
                    break;
                }
            }
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

fn is_lost_race(error: &DomainError) -> bool {
    matches!(
        error,
        DomainError::Order(domain::OrderError::InvalidTransition { .. })
            | DomainError::Order(domain::OrderError::NotExpired { .. })
    )
}
