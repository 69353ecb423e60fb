//! Engine tuning knobs.

use std::time::Duration;

use chrono::TimeDelta;

pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Longest hold a reservation may be given.
pub const MAX_RESERVATION_TTL: Duration = Duration::from_secs(366 * 24 * 60 * 60);
/// Longest pause between two sweeps.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long checkout holds stock while waiting for payment.
    pub reservation_ttl: Duration,

    /// How often the expiry sweeper scans for lapsed reservations.
    pub sweep_interval: Duration,

    /// ISO currency code sent to the payment gateway.
    pub currency: String,
}

impl EngineConfig {
    /// The reservation TTL as a calendar duration, capped at
    /// [`MAX_RESERVATION_TTL`].
    pub fn reservation_ttl_delta(&self) -> TimeDelta {
        let ttl = self.reservation_ttl.min(MAX_RESERVATION_TTL);
        TimeDelta::from_std(ttl).unwrap_or(TimeDelta::zero())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: DEFAULT_RESERVATION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            currency: "USD".to_string(),
        }
    }
}
