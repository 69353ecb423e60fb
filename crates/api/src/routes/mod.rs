//! HTTP route handlers.

pub mod carts;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod products;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses an identifier taken from the request path.
pub(crate) fn parse_id<T: FromStr>(kind: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {kind} id: {raw}")))
}
