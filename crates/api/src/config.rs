//! Process configuration for the HTTP binary.

use stockledger_infra::config::read_var;
use stockledger_infra::{ConfigError, LedgerConfig};
use stockledger_observability::{LogConfig, LogFormat};

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Listen address (`STOCKLEDGER_BIND`).
    pub bind: String,
    pub log: LogConfig,
    pub ledger: LedgerConfig,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = read_var(&lookup, "STOCKLEDGER_BIND", "0.0.0.0:8080".to_string())?;
        let format = read_var(&lookup, "STOCKLEDGER_LOG_FORMAT", LogFormat::Json)?;
        let ledger = LedgerConfig::from_lookup(&lookup)?;

        Ok(Self {
            bind,
            log: LogConfig {
                format,
                ..LogConfig::default()
            },
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_every_interface() {
        let config = ApiConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.ledger.database_url.is_none());
    }

    #[test]
    fn log_format_is_validated() {
        let lookup = |name: &str| (name == "STOCKLEDGER_LOG_FORMAT").then(|| "yaml".to_string());
        let err = ApiConfig::from_lookup(lookup).unwrap_err();
        assert!(err.to_string().contains("STOCKLEDGER_LOG_FORMAT"));

        let lookup = |name: &str| (name == "STOCKLEDGER_LOG_FORMAT").then(|| "pretty".to_string());
        assert_eq!(ApiConfig::from_lookup(lookup).unwrap().log.format, LogFormat::Pretty);
    }
}
