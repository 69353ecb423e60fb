//! Product catalog: names and prices.

use row_store::{RowStore, WriteOp};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::handler::RowHandler;
use crate::value_objects::{Money, ProductId};

pub const PRODUCTS_TABLE: &str = "products";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub unit_price: Money,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            unit_price,
        }
    }
}

/// Read access to product descriptions. Prices are captured onto orders at
/// checkout, so later catalog edits never change an existing order.
pub struct ProductCatalog<S> {
    products: RowHandler<S, Product>,
}

impl<S: Clone> Clone for ProductCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            products: self.products.clone(),
        }
    }
}

impl<S: RowStore> ProductCatalog<S> {
    pub fn new(store: S) -> Self {
        Self {
            products: RowHandler::new(store, PRODUCTS_TABLE),
        }
    }

    /// Validates a product and builds its insert.
    pub fn insert_op(&self, product: &Product) -> Result<WriteOp, DomainError> {
        if !product.unit_price.is_positive() {
            return Err(DomainError::InvalidPrice {
                cents: product.unit_price.cents(),
            });
        }
        self.products.insert_op(product.id.as_str(), product)
    }

    pub async fn get(&self, id: &ProductId) -> Result<Option<Product>, DomainError> {
        Ok(self.products.load(id.as_str()).await?.map(|row| row.value))
    }

    /// Like [`ProductCatalog::get`] but a missing product is an error.
    pub async fn require(&self, id: &ProductId) -> Result<Product, DomainError> {
        self.get(id)
            .await?
            .ok_or_else(|| DomainError::UnknownProduct(id.clone()))
    }

    pub async fn all(&self) -> Result<Vec<Product>, DomainError> {
        Ok(self
            .products
            .load_all()
            .await?
            .into_iter()
            .map(|row| row.value)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use row_store::InMemoryRowStore;

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = InMemoryRowStore::new();
        let catalog = ProductCatalog::new(store.clone());
        let widget = Product::new("SKU-1", "Widget", Money::from_cents(1250));

        store.apply(catalog.insert_op(&widget).unwrap()).await.unwrap();

        assert_eq!(catalog.require(&"SKU-1".into()).await.unwrap(), widget);
        assert_eq!(catalog.all().await.unwrap().len(), 1);
        assert!(matches!(
            catalog.require(&"SKU-2".into()).await,
            Err(DomainError::UnknownProduct(_))
        ));
    }

    #[test]
    fn test_free_products_are_rejected() {
        let catalog = ProductCatalog::new(InMemoryRowStore::new());
        let result = catalog.insert_op(&Product::new("SKU-1", "Freebie", Money::zero()));
        assert!(matches!(result, Err(DomainError::InvalidPrice { cents: 0 })));
    }
}
