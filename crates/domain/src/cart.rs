//! Shopping carts.
//!
//! A cart is a customer's list of intended purchases. It holds no stock:
//! adding an item only checks that the product exists. Stock is claimed at
//! checkout, from a snapshot of the cart taken at that moment.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::CustomerId;
use row_store::RowStore;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::DomainError;
use crate::handler::{Decision, RowHandler};
use crate::stock::StockLedger;
use crate::value_objects::{LineItem, ProductId};

pub const CARTS_TABLE: &str = "carts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub customer_id: CustomerId,
    lines: BTreeMap<ProductId, u32>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(customer_id: CustomerId, now: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            lines: BTreeMap::new(),
            updated_at: now,
        }
    }

    /// Lines ordered by product id.
    pub fn lines(&self) -> Vec<LineItem> {
        self.lines
            .iter()
            .map(|(product_id, quantity)| LineItem::new(product_id.clone(), *quantity))
            .collect()
    }

    pub fn quantity_of(&self, product_id: &ProductId) -> Option<u32> {
        self.lines.get(product_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn add(&mut self, product_id: &ProductId, quantity: u32) -> Result<(), DomainError> {
        let line = self.lines.entry(product_id.clone()).or_insert(0);
        *line = line
            .checked_add(quantity)
            .ok_or(DomainError::InvalidQuantity {
                quantity: i64::from(quantity),
            })?;
        Ok(())
    }

    fn set(&mut self, product_id: &ProductId, quantity: i64) -> Result<(), DomainError> {
        if quantity <= 0 {
            self.lines.remove(product_id);
            return Ok(());
        }
        let quantity =
            u32::try_from(quantity).map_err(|_| DomainError::InvalidQuantity { quantity })?;
        self.lines.insert(product_id.clone(), quantity);
        Ok(())
    }
}

/// The cart contents a checkout works from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSnapshot {
    pub customer_id: CustomerId,
    pub lines: Vec<LineItem>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub struct CartStore<S> {
    carts: RowHandler<S, Cart>,
    ledger: StockLedger<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Clone> Clone for CartStore<S> {
    fn clone(&self) -> Self {
        Self {
            carts: self.carts.clone(),
            ledger: self.ledger.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: RowStore> CartStore<S> {
    pub fn new(store: S, ledger: StockLedger<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            carts: RowHandler::new(store, CARTS_TABLE),
            ledger,
            clock,
        }
    }

    async fn ensure_product(&self, product_id: &ProductId) -> Result<(), DomainError> {
        if self.ledger.get(product_id).await?.is_none() {
            return Err(DomainError::UnknownProduct(product_id.clone()));
        }
        Ok(())
    }

    /// Adds `quantity` units of a product, merging with an existing line.
    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    pub async fn add_item(
        &self,
        customer_id: CustomerId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<Cart, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        self.ensure_product(product_id).await?;

        let now = self.clock.now();
        self.carts
            .execute(&customer_id.to_string(), |current| {
                let mut cart = current
                    .cloned()
                    .unwrap_or_else(|| Cart::new(customer_id, now));
                cart.add(product_id, quantity)?;
                cart.updated_at = now;
                Ok(Decision::Write(cart.clone(), cart))
            })
            .await
    }

    /// Sets a line to an exact quantity. Zero or less removes the line, and a
    /// cart left with no lines is deleted (`None` is returned).
    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    pub async fn set_quantity(
        &self,
        customer_id: CustomerId,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<Option<Cart>, DomainError> {
        if quantity > 0 {
            self.ensure_product(product_id).await?;
        }

        let now = self.clock.now();
        self.carts
            .execute(&customer_id.to_string(), |current| {
                let mut cart = match current {
                    Some(cart) => cart.clone(),
                    None if quantity <= 0 => return Ok(Decision::Keep(None)),
                    None => Cart::new(customer_id, now),
                };
                cart.set(product_id, quantity)?;
                cart.updated_at = now;

                if cart.is_empty() {
                    Ok(Decision::Delete(None))
                } else {
                    Ok(Decision::Write(cart.clone(), Some(cart)))
                }
            })
            .await
    }

    pub async fn remove_item(
        &self,
        customer_id: CustomerId,
        product_id: &ProductId,
    ) -> Result<Option<Cart>, DomainError> {
        self.set_quantity(customer_id, product_id, 0).await
    }

    pub async fn get(&self, customer_id: CustomerId) -> Result<Option<Cart>, DomainError> {
        Ok(self
            .carts
            .load(&customer_id.to_string())
            .await?
            .map(|row| row.value))
    }

    pub async fn clear(&self, customer_id: CustomerId) -> Result<(), DomainError> {
        self.carts
            .execute(&customer_id.to_string(), |_| Ok(Decision::Delete(())))
            .await
    }

    /// Captures the cart's current lines. A missing cart yields an empty snapshot.
    pub async fn snapshot(&self, customer_id: CustomerId) -> Result<CartSnapshot, DomainError> {
        let lines = self
            .get(customer_id)
            .await?
            .map(|cart| cart.lines())
            .unwrap_or_default();
        Ok(CartSnapshot { customer_id, lines })
    }

    /// Removes the lines an order was placed from.
    ///
    /// Only lines whose quantity still matches the snapshot are removed, so
    /// anything the customer changed while checking out stays in the cart.
    pub async fn consume(&self, snapshot: &CartSnapshot) -> Result<(), DomainError> {
        let now = self.clock.now();
        self.carts
            .execute(&snapshot.customer_id.to_string(), |current| {
                let Some(cart) = current else {
                    return Ok(Decision::Keep(()));
                };
                let mut cart = cart.clone();
                for line in &snapshot.lines {
                    if cart.quantity_of(&line.product_id) == Some(line.quantity) {
                        cart.lines.remove(&line.product_id);
                    }
                }

                if cart.is_empty() {
                    Ok(Decision::Delete(()))
                } else {
                    cart.updated_at = now;
                    Ok(Decision::Write(cart, ()))
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use row_store::InMemoryRowStore;

    async fn carts() -> CartStore<InMemoryRowStore> {
        let store = InMemoryRowStore::new();
        let ledger = StockLedger::new(store.clone());
        ledger.register(&"SKU-1".into(), 10).await.unwrap();
        ledger.register(&"SKU-2".into(), 0).await.unwrap();
        CartStore::new(store, ledger, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_add_item_accumulates() {
        let carts = carts().await;
        let customer = CustomerId::new();

        carts.add_item(customer, &"SKU-1".into(), 2).await.unwrap();
        let cart = carts.add_item(customer, &"SKU-1".into(), 3).await.unwrap();

        assert_eq!(cart.quantity_of(&"SKU-1".into()), Some(5));
        assert_eq!(cart.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_stock_products_can_still_be_added() {
        let carts = carts().await;
        let cart = carts
            .add_item(CustomerId::new(), &"SKU-2".into(), 4)
            .await
            .unwrap();
        assert_eq!(cart.quantity_of(&"SKU-2".into()), Some(4));
    }

    #[tokio::test]
    async fn test_add_item_validates_input() {
        let carts = carts().await;
        let customer = CustomerId::new();

        assert!(matches!(
            carts.add_item(customer, &"SKU-1".into(), 0).await,
            Err(DomainError::InvalidQuantity { quantity: 0 })
        ));
        assert!(matches!(
            carts.add_item(customer, &"ghost".into(), 1).await,
            Err(DomainError::UnknownProduct(_))
        ));
        assert!(carts.get(customer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_quantity_to_zero_removes_line_and_empty_cart() {
        let carts = carts().await;
        let customer = CustomerId::new();
        carts.add_item(customer, &"SKU-1".into(), 2).await.unwrap();
        carts.add_item(customer, &"SKU-2".into(), 1).await.unwrap();

        let cart = carts
            .set_quantity(customer, &"SKU-1".into(), -3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cart.quantity_of(&"SKU-1".into()), None);

        let cart = carts.remove_item(customer, &"SKU-2".into()).await.unwrap();
        assert!(cart.is_none());
        assert!(carts.get(customer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_quantity_on_missing_cart_creates_it() {
        let carts = carts().await;
        let customer = CustomerId::new();

        let cart = carts
            .set_quantity(customer, &"SKU-1".into(), 7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cart.quantity_of(&"SKU-1".into()), Some(7));

        assert!(
            carts
                .set_quantity(CustomerId::new(), &"SKU-1".into(), 0)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_cart_is_empty() {
        let carts = carts().await;
        let snapshot = carts.snapshot(CustomerId::new()).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_consume_keeps_lines_changed_after_snapshot() {
        let carts = carts().await;
        let customer = CustomerId::new();
        carts.add_item(customer, &"SKU-1".into(), 2).await.unwrap();
        carts.add_item(customer, &"SKU-2".into(), 1).await.unwrap();

        let snapshot = carts.snapshot(customer).await.unwrap();
        carts.add_item(customer, &"SKU-2".into(), 1).await.unwrap();

        carts.consume(&snapshot).await.unwrap();

        let cart = carts.get(customer).await.unwrap().unwrap();
        assert_eq!(cart.quantity_of(&"SKU-1".into()), None);
        assert_eq!(cart.quantity_of(&"SKU-2".into()), Some(2));
    }

    #[tokio::test]
    async fn test_consume_deletes_fully_ordered_cart() {
        let carts = carts().await;
        let customer = CustomerId::new();
        carts.add_item(customer, &"SKU-1".into(), 2).await.unwrap();

        let snapshot = carts.snapshot(customer).await.unwrap();
        carts.consume(&snapshot).await.unwrap();

        assert!(carts.get(customer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let carts = carts().await;
        let customer = CustomerId::new();
        carts.add_item(customer, &"SKU-1".into(), 1).await.unwrap();

        carts.clear(customer).await.unwrap();
        carts.clear(customer).await.unwrap();
        assert!(carts.get(customer).await.unwrap().is_none());
    }
}
