//! Application configuration loaded from environment variables.

use std::time::Duration;

use engine::EngineConfig;
use engine::config::{
    DEFAULT_RESERVATION_TTL, DEFAULT_SWEEP_INTERVAL, MAX_RESERVATION_TTL, MAX_SWEEP_INTERVAL,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `0.0.0.0`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `DATABASE_URL`: Postgres connection string; unset means in-memory storage
/// - `RESERVATION_TTL_SECS`: how long checkout holds stock (default 900, at most 366 days)
/// - `SWEEP_INTERVAL_SECS`: how often lapsed reservations are swept (default 30, at most a day)
/// - `CURRENCY`: currency code sent to the payment gateway (default `USD`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub currency: String,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing keys. Present but malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: match lookup("PORT") {
                Some(raw) => parse("PORT", raw)?,
                None => defaults.port,
            },
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            reservation_ttl: seconds(
                &lookup,
                "RESERVATION_TTL_SECS",
                defaults.reservation_ttl,
                MAX_RESERVATION_TTL,
            )?,
            sweep_interval: seconds(
                &lookup,
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval,
                MAX_SWEEP_INTERVAL,
            )?,
            currency: lookup("CURRENCY").unwrap_or(defaults.currency),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            reservation_ttl: self.reservation_ttl,
            sweep_interval: self.sweep_interval,
            currency: self.currency.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            reservation_ttl: DEFAULT_RESERVATION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            currency: "USD".to_string(),
        }
    }
}

fn parse<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value: raw,
    })
}

/// Reads a number of seconds between 1 and `max`.
fn seconds<F>(
    lookup: &F,
    key: &'static str,
    default: Duration,
    max: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let invalid = |value: String, reason: String| ConfigError::Invalid { key, value, reason };
    match parse::<u64>(key, raw.clone())? {
        0 => Err(invalid(raw, "must be greater than 0".to_string())),
        secs if secs > max.as_secs() => Err(invalid(
            raw,
            format!("must be at most {} seconds", max.as_secs()),
        )),
        secs => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_url, None);
        assert_eq!(config.engine(), EngineConfig::default());
    }

    #[test]
    fn test_reads_every_key() {
        let config = load(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("RUST_LOG", "debug"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("RESERVATION_TTL_SECS", "60"),
            ("SWEEP_INTERVAL_SECS", "5"),
            ("CURRENCY", "EUR"),
        ])
        .unwrap();

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/shop"));

        let engine = config.engine();
        assert_eq!(engine.reservation_ttl, Duration::from_secs(60));
        assert_eq!(engine.sweep_interval, Duration::from_secs(5));
        assert_eq!(engine.currency, "EUR");
    }

    #[test]
    fn test_malformed_port_is_an_error() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = load(&[("SWEEP_INTERVAL_SECS", "0")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }
        );
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let err = load(&[("RESERVATION_TTL_SECS", "18446744073709551615")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "RESERVATION_TTL_SECS",
                ..
            }
        ));

        let over_a_year = (MAX_RESERVATION_TTL.as_secs() + 1).to_string();
        assert!(load(&[("RESERVATION_TTL_SECS", over_a_year.as_str())]).is_err());

        let at_limit = MAX_RESERVATION_TTL.as_secs().to_string();
        let config = load(&[("RESERVATION_TTL_SECS", at_limit.as_str())]).unwrap();
        assert_eq!(config.reservation_ttl, MAX_RESERVATION_TTL);

        assert!(load(&[("SWEEP_INTERVAL_SECS", "86401")]).is_err());
    }

    #[test]
    fn test_empty_database_url_means_memory() {
        let config = load(&[("DATABASE_URL", "")]).unwrap();
        assert_eq!(config.database_url, None);
    }
}
