//! Storefront engine.
//!
//! Sits between callers (the HTTP binding, tests) and the domain layer:
//! - [`Storefront`]: one facade for catalog, carts, checkout and payment
//! - [`services::PaymentGateway`]: the seam to the external payment processor
//! - [`ExpirySweeper`]: background task cancelling orders whose reservation lapsed

pub mod config;
pub mod error;
pub mod services;
pub mod storefront;
pub mod sweeper;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use storefront::{CallbackOutcome, Storefront};
pub use sweeper::{ExpirySweeper, SweepReport};
