//! Domain layer for the storefront.
//!
//! This crate provides:
//! - A stock ledger that never oversells, built on compare-and-swap rows
//! - Customer carts that hold intent but no stock
//! - Time-limited stock reservations with release and commit
//! - The order lifecycle state machine and the manager that drives it
//!
//! All state lives in a [`row_store::RowStore`]; every mutation goes through
//! [`handler::RowHandler`], an optimistic read / decide / write loop.

pub mod cart;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod handler;
pub mod order;
pub mod reservation;
pub mod stock;
pub mod value_objects;

pub use cart::{Cart, CartSnapshot, CartStore};
pub use catalog::{Product, ProductCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, Shortage};
pub use handler::{Decision, RowHandler};
pub use order::{
    CancelReason, Confirmation, Order, OrderError, OrderLifecycleManager, OrderLine, OrderState,
    Timeline,
};
pub use reservation::{Hold, Reservation, ReservationManager, ReservationStatus};
pub use stock::{ProductStock, StockLedger};
pub use value_objects::{LineItem, Money, PaymentRef, ProductId};
