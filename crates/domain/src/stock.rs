//! Per-product stock counters.
//!
//! Each product has one row holding `available` and `reserved` counts. Every
//! change is a single compare-and-swap on that row, so two requests for the
//! last unit can never both succeed.

use row_store::{RowStore, WriteOp};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Shortage};
use crate::handler::{Decision, RowHandler};
use crate::value_objects::ProductId;

pub const STOCK_TABLE: &str = "stock";

/// Stock counters for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: ProductId,
    available: u32,
    reserved: u32,
}

impl ProductStock {
    pub fn new(product_id: impl Into<ProductId>, available: u32) -> Self {
        Self {
            product_id: product_id.into(),
            available,
            reserved: 0,
        }
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Units held by active reservations.
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Units physically on hand, whether held or not.
    pub fn on_hand(&self) -> u64 {
        u64::from(self.available) + u64::from(self.reserved)
    }

    fn reserve(&mut self, quantity: u32) -> Result<(), DomainError> {
        if quantity > self.available {
            return Err(DomainError::InsufficientStock {
                shortages: vec![Shortage {
                    product_id: self.product_id.clone(),
                    requested: quantity,
                    available: self.available,
                }],
            });
        }
        self.available -= quantity;
        self.reserved += quantity;
        Ok(())
    }

    fn release(&mut self, quantity: u32) -> Result<(), DomainError> {
        self.take_reserved(quantity, "release")?;
        self.available += quantity;
        Ok(())
    }

    fn commit(&mut self, quantity: u32) -> Result<(), DomainError> {
        self.take_reserved(quantity, "commit")
    }

    fn restock(&mut self, quantity: u32) -> Result<(), DomainError> {
        // on_hand must stay representable as u32
        self.available = self
            .available
            .checked_add(quantity)
            .filter(|available| available.checked_add(self.reserved).is_some())
            .ok_or(DomainError::InvalidQuantity {
                quantity: i64::from(quantity),
            })?;
        Ok(())
    }

    fn take_reserved(&mut self, quantity: u32, action: &str) -> Result<(), DomainError> {
        if quantity > self.reserved {
            tracing::error!(
                product_id = %self.product_id,
                available = self.available,
                reserved = self.reserved,
                requested = quantity,
                action,
                "stock invariant violated: more units than are reserved"
            );
            return Err(DomainError::invariant(
                format!("stock {}", self.product_id),
                format!(
                    "cannot {action} {quantity} units, only {} reserved",
                    self.reserved
                ),
            ));
        }
        self.reserved -= quantity;
        Ok(())
    }
}

fn require_positive(quantity: u32) -> Result<(), DomainError> {
    if quantity == 0 {
        return Err(DomainError::InvalidQuantity { quantity: 0 });
    }
    Ok(())
}

/// Authoritative record of available and reserved units per product.
pub struct StockLedger<S> {
    rows: RowHandler<S, ProductStock>,
}

impl<S: Clone> Clone for StockLedger<S> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
        }
    }
}

impl<S: RowStore> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            rows: RowHandler::new(store, STOCK_TABLE),
        }
    }

    /// Builds the insert that registers a product, for use in a transaction.
    pub fn register_op(&self, product_id: &ProductId, initial: u32) -> Result<WriteOp, DomainError> {
        self.rows
            .insert_op(product_id.as_str(), &ProductStock::new(product_id.clone(), initial))
    }

    /// Starts tracking a product with `initial` available units.
    pub async fn register(
        &self,
        product_id: &ProductId,
        initial: u32,
    ) -> Result<ProductStock, DomainError> {
        let op = self.register_op(product_id, initial)?;
        match self.rows.store().apply(op).await {
            Ok(_) => Ok(ProductStock::new(product_id.clone(), initial)),
            Err(row_store::StoreError::AlreadyExists { .. }) => {
                Err(DomainError::ProductAlreadyExists(product_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, product_id: &ProductId) -> Result<Option<ProductStock>, DomainError> {
        Ok(self
            .rows
            .load(product_id.as_str())
            .await?
            .map(|row| row.value))
    }

    /// Every tracked product, ordered by id.
    pub async fn all(&self) -> Result<Vec<ProductStock>, DomainError> {
        Ok(self
            .rows
            .load_all()
            .await?
            .into_iter()
            .map(|row| row.value)
            .collect())
    }

    /// Moves `quantity` units from available to reserved.
    ///
    /// Fails with `InsufficientStock` without changing anything when fewer
    /// than `quantity` units are available.
    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ProductStock, DomainError> {
        let result = self
            .mutate(product_id, quantity, |stock| stock.reserve(quantity))
            .await;

        match &result {
            Ok(_) => metrics::counter!("stock_reservations_total").increment(1),
            Err(DomainError::InsufficientStock { .. }) => {
                metrics::counter!("stock_reservation_rejected_total").increment(1);
            }
            Err(_) => {}
        }
        result
    }

    /// Moves `quantity` units from reserved back to available.
    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    pub async fn release(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ProductStock, DomainError> {
        self.mutate(product_id, quantity, |stock| stock.release(quantity))
            .await
    }

    /// Removes `quantity` reserved units permanently (they have shipped).
    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    pub async fn commit(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ProductStock, DomainError> {
        self.mutate(product_id, quantity, |stock| stock.commit(quantity))
            .await
    }

    /// Adds `quantity` units to available stock.
    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    pub async fn restock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ProductStock, DomainError> {
        self.mutate(product_id, quantity, |stock| stock.restock(quantity))
            .await
    }

    /// Builds the release of `quantity` held units as a conditional write on
    /// the product's current row, for use in a multi-row transaction.
    pub async fn release_op(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<WriteOp, DomainError> {
        self.change_op(product_id, quantity, |stock| stock.release(quantity))
            .await
    }

    /// Like [`StockLedger::release_op`], but the units leave stock for good.
    pub async fn commit_op(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<WriteOp, DomainError> {
        self.change_op(product_id, quantity, |stock| stock.commit(quantity))
            .await
    }

    async fn change_op<F>(
        &self,
        product_id: &ProductId,
        quantity: u32,
        change: F,
    ) -> Result<WriteOp, DomainError>
    where
        F: FnOnce(&mut ProductStock) -> Result<(), DomainError>,
    {
        require_positive(quantity)?;

        let Some(row) = self.rows.load(product_id.as_str()).await? else {
            return Err(DomainError::UnknownProduct(product_id.clone()));
        };
        let mut next = row.value;
        change(&mut next)?;
        self.rows.update_op(product_id.as_str(), row.version, &next)
    }

    async fn mutate<F>(
        &self,
        product_id: &ProductId,
        quantity: u32,
        change: F,
    ) -> Result<ProductStock, DomainError>
    where
        F: Fn(&mut ProductStock) -> Result<(), DomainError> + Send + Sync,
    {
        require_positive(quantity)?;

        self.rows
            .execute(product_id.as_str(), |current| {
                let Some(stock) = current else {
                    return Err(DomainError::UnknownProduct(product_id.clone()));
                };
                let mut next = stock.clone();
                change(&mut next)?;
                Ok(Decision::Write(next.clone(), next))
            })
            .await
    }
}
