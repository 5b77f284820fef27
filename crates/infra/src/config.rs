//! Environment-driven configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Read `name` through `lookup`, falling back to `default` when unset or blank.
pub fn read_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

/// Ledger runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Longest a transaction waits for one partition lock.
    pub lock_wait: Duration,
    pub retry: RetryPolicy,
    /// Most entry ids a Postgres transaction reserves up front; more are taken when it runs out.
    pub id_block: u32,
    /// Postgres connection string; in-memory store when absent.
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(50),
            retry: RetryPolicy::default(),
            id_block: 256,
            database_url: None,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_wait_ms = read_var(&lookup, "STOCKLEDGER_LOCK_WAIT_MS", 50u64)?;
        let attempts = read_var(&lookup, "STOCKLEDGER_RETRY_ATTEMPTS", defaults.retry.max_attempts)?;
        let base_ms = read_var(&lookup, "STOCKLEDGER_RETRY_BASE_MS", defaults.retry.base_delay_ms)?;
        let max_ms = read_var(&lookup, "STOCKLEDGER_RETRY_MAX_MS", defaults.retry.max_delay_ms)?;
        let id_block = read_var(&lookup, "STOCKLEDGER_ID_BLOCK", defaults.id_block)?;
        if id_block == 0 {
            return Err(ConfigError::Invalid {
                name: "STOCKLEDGER_ID_BLOCK".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            lock_wait: Duration::from_millis(lock_wait_ms),
            retry: RetryPolicy::new(attempts, base_ms, max_ms, defaults.retry.jitter_pct),
            id_block,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
        })
    }
}
