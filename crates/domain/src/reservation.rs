//! Time-limited holds on stock for a single order.
//!
//! A reservation records which units an order holds and until when. Its
//! status moves from `Active` to exactly one of `Released` or `Committed`.
//! The status flip and the stock counter changes for every hold are written
//! in one multi-row transaction, each row conditional on the version it was
//! read at. Either all of it lands or none of it does, so a reservation is
//! never settled while its units are still counted as reserved, and
//! concurrent or repeated release and commit requests never double-count.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use common::{OrderId, ReservationId};
use row_store::{RowStore, WriteOp};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{DomainError, Shortage};
use crate::handler::RowHandler;
use crate::stock::StockLedger;
use crate::value_objects::{LineItem, ProductId};

pub const RESERVATIONS_TABLE: &str = "reservations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Committed,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Units of one product held by a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    /// Sorted by product id, one entry per product.
    pub holds: Vec<Hold>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn quantity_of(&self, product_id: &ProductId) -> u32 {
        self.holds
            .iter()
            .find(|hold| &hold.product_id == product_id)
            .map(|hold| hold.quantity)
            .unwrap_or(0)
    }
}

/// Merges duplicate lines and orders them by product id.
///
/// Every multi-product reservation walks products in this one global order,
/// which keeps concurrent checkouts over overlapping products from
/// interleaving into partial holds on each other's products.
fn plan_holds(lines: &[LineItem]) -> Result<Vec<Hold>, DomainError> {
    let mut merged: BTreeMap<&ProductId, u32> = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        let total = merged.entry(&line.product_id).or_insert(0);
        *total = total
            .checked_add(line.quantity)
            .ok_or(DomainError::InvalidQuantity {
                quantity: i64::from(line.quantity),
            })?;
    }

    if merged.is_empty() {
        return Err(DomainError::InvalidQuantity { quantity: 0 });
    }

    Ok(merged
        .into_iter()
        .map(|(product_id, quantity)| Hold {
            product_id: product_id.clone(),
            quantity,
        })
        .collect())
}

pub struct ReservationManager<S> {
    reservations: RowHandler<S, Reservation>,
    ledger: StockLedger<S>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
}

impl<S: Clone> Clone for ReservationManager<S> {
    fn clone(&self) -> Self {
        Self {
            reservations: self.reservations.clone(),
            ledger: self.ledger.clone(),
            clock: self.clock.clone(),
            ttl: self.ttl,
        }
    }
}

impl<S: RowStore> ReservationManager<S> {
    pub fn new(store: S, ledger: StockLedger<S>, clock: Arc<dyn Clock>, ttl: TimeDelta) -> Self {
        Self {
            reservations: RowHandler::new(store, RESERVATIONS_TABLE),
            ledger,
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Claims stock for every line of an order, all or nothing.
    ///
    /// The returned reservation is not yet stored; the caller persists it
    /// together with its order via [`ReservationManager::insert_op`], or gives
    /// the stock back with [`ReservationManager::rollback`].
    ///
    /// On shortage every hold taken so far is released and the error names
    /// the product that failed first plus any later products that were also
    /// short at the time of the check.
    #[tracing::instrument(skip(self, lines), fields(order_id = %order_id))]
    pub async fn create_reservation(
        &self,
        order_id: OrderId,
        lines: &[LineItem],
    ) -> Result<Reservation, DomainError> {
        let holds = plan_holds(lines)?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(DomainError::ReservationTtlOutOfRange {
                ttl_seconds: self.ttl.num_seconds(),
            })?;

        for (index, hold) in holds.iter().enumerate() {
            let result = self.ledger.reserve(&hold.product_id, hold.quantity).await;
            let Err(error) = result else {
                continue;
            };

            self.release_holds(&holds[..index]).await?;

            return match error {
                DomainError::InsufficientStock { mut shortages } => {
                    shortages.extend(self.advisory_shortages(&holds[index + 1..]).await);
                    tracing::info!(
                        shortages = shortages.len(),
                        "reservation refused for insufficient stock"
                    );
                    Err(DomainError::InsufficientStock { shortages })
                }
                other => Err(other),
            };
        }

        let reservation = Reservation {
            id: ReservationId::new(),
            order_id,
            holds,
            created_at: now,
            expires_at,
            status: ReservationStatus::Active,
        };

        tracing::debug!(
            reservation_id = %reservation.id,
            expires_at = %reservation.expires_at,
            "stock reserved"
        );
        Ok(reservation)
    }

    /// Checks, without reserving anything, which of `holds` could not be met
    /// right now.
    async fn advisory_shortages(&self, holds: &[Hold]) -> Vec<Shortage> {
        let mut shortages = Vec::new();
        for hold in holds {
            if let Ok(Some(stock)) = self.ledger.get(&hold.product_id).await
                && stock.available() < hold.quantity
            {
                shortages.push(Shortage {
                    product_id: hold.product_id.clone(),
                    requested: hold.quantity,
                    available: stock.available(),
                });
            }
        }
        shortages
    }

    /// Returns held units to the available pool.
    ///
    /// Keeps going after a failure so one bad product does not strand the
    /// rest; the first error is returned.
    async fn release_holds(&self, holds: &[Hold]) -> Result<(), DomainError> {
        let mut first_error = None;
        for hold in holds {
            if let Err(e) = self.ledger.release(&hold.product_id, hold.quantity).await {
                tracing::error!(
                    product_id = %hold.product_id,
                    quantity = hold.quantity,
                    error = %e,
                    "failed to release held stock"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn insert_op(&self, reservation: &Reservation) -> Result<WriteOp, DomainError> {
        self.reservations
            .insert_op(&reservation.id.to_string(), reservation)
    }

    /// Undoes [`ReservationManager::create_reservation`] for a reservation
    /// that was never stored.
    pub async fn rollback(&self, reservation: &Reservation) -> Result<(), DomainError> {
        tracing::debug!(reservation_id = %reservation.id, "rolling back unsaved reservation");
        self.release_holds(&reservation.holds).await
    }

    pub async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, DomainError> {
        Ok(self
            .reservations
            .load(&id.to_string())
            .await?
            .map(|row| row.value))
    }

    /// Every reservation that still holds stock.
    pub async fn active(&self) -> Result<Vec<Reservation>, DomainError> {
        Ok(self
            .reservations
            .load_all()
            .await?
            .into_iter()
            .map(|row| row.value)
            .filter(|reservation| reservation.status == ReservationStatus::Active)
            .collect())
    }

    /// Returns the reservation's units to available stock.
    ///
    /// Returns `true` if this call released it and `false` if it had already
    /// been released. Releasing a committed reservation is an invariant
    /// violation.
    #[tracing::instrument(skip(self))]
    pub async fn release_reservation(&self, id: ReservationId) -> Result<bool, DomainError> {
        let released = self.settle(id, ReservationStatus::Released).await?;
        if released {
            metrics::counter!("reservations_released_total").increment(1);
        }
        Ok(released)
    }

    /// Converts the reservation's held units into shipped units.
    ///
    /// Returns `true` if this call committed it and `false` if it had already
    /// been committed. Committing a released reservation is an invariant
    /// violation.
    #[tracing::instrument(skip(self))]
    pub async fn commit_reservation(&self, id: ReservationId) -> Result<bool, DomainError> {
        let committed = self.settle(id, ReservationStatus::Committed).await?;
        if committed {
            metrics::counter!("reservations_committed_total").increment(1);
        }
        Ok(committed)
    }

    /// Moves an active reservation to `target` together with the ledger
    /// change for each of its holds. Returns `true` when this call made the
    /// move and `false` when it was already there.
    ///
    /// A failed attempt writes nothing, so the reservation stays `Active` and
    /// can be settled again later.
    async fn settle(&self, id: ReservationId, target: ReservationStatus) -> Result<bool, DomainError> {
        let key = id.to_string();
        let attempts = self.reservations.max_attempts();

        for attempt in 1..=attempts {
            let Some(current) = self.reservations.load(&key).await? else {
                return Err(DomainError::ReservationNotFound(id));
            };

            match current.value.status {
                ReservationStatus::Active => {}
                status if status == target => return Ok(false),
                status => {
                    tracing::error!(
                        reservation_id = %id,
                        order_id = %current.value.order_id,
                        current = %status,
                        requested = %target,
                        "reservation invariant violated"
                    );
                    return Err(DomainError::invariant(
                        format!("reservation {id}"),
                        format!("cannot move a {status} reservation to {target}"),
                    ));
                }
            }

            let mut settled = current.value;
            settled.status = target;

            let mut ops = Vec::with_capacity(settled.holds.len() + 1);
            ops.push(self.reservations.update_op(&key, current.version, &settled)?);
            for hold in &settled.holds {
                let op = match target {
                    ReservationStatus::Committed => {
                        self.ledger.commit_op(&hold.product_id, hold.quantity).await?
                    }
                    _ => self.ledger.release_op(&hold.product_id, hold.quantity).await?,
                };
                ops.push(op);
            }

            match self.reservations.store().transaction(ops).await {
                Ok(_) => return Ok(true),
                Err(e) if e.is_write_conflict() => {
                    tracing::debug!(reservation_id = %id, attempt, "settle conflicted, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            reservation_id = %id,
            attempts,
            requested = %target,
            "giving up settling reservation after repeated write conflicts"
        );
        Err(DomainError::ContentionExhausted {
            table: RESERVATIONS_TABLE,
            key,
            attempts,
        })
    }
}
