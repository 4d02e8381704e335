//! Configuration module
//!
//! Loads configuration from environment variables.

use chrono::Duration;
use std::env;
use std::str::FromStr;

use crate::domain::denomination::DEFAULT_DENOMINATIONS;
use crate::domain::{DenominationTable, Money};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// `json` for structured logs, anything else for the pretty formatter
    pub log_format: String,

    /// ISO currency code of every amount in the ledger
    pub currency_code: String,

    /// Accepted banknote and coin face values
    pub denominations: DenominationTable,

    /// Closing variances above this are flagged for review
    pub variance_alert_threshold: Money,

    pub idempotency_ttl_hours: i64,

    /// Period of the invariant sweep
    pub invariant_check_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 3000)?;
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());
        let log_format = lookup("LOG_FORMAT").unwrap_or_else(|| "pretty".to_string());
        let currency_code = lookup("CURRENCY_CODE").unwrap_or_else(|| "PEN".to_string());

        let denominations = DenominationTable::parse(
            &lookup("DENOMINATIONS").unwrap_or_else(|| DEFAULT_DENOMINATIONS.to_string()),
        )
        .map_err(|_| ConfigError::InvalidValue("DENOMINATIONS"))?;

        let variance_alert_threshold = lookup("VARIANCE_ALERT_THRESHOLD")
            .unwrap_or_else(|| "10.00".to_string())
            .parse::<Money>()
            .map_err(|_| ConfigError::InvalidValue("VARIANCE_ALERT_THRESHOLD"))?;

        let idempotency_ttl_hours: i64 = parse_or(&lookup, "IDEMPOTENCY_TTL_HOURS", 24)?;
        if idempotency_ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue("IDEMPOTENCY_TTL_HOURS"));
        }

        let invariant_check_interval_secs: u64 = parse_or(&lookup, "INVARIANT_CHECK_INTERVAL_SECS", 300)?;
        if invariant_check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("INVARIANT_CHECK_INTERVAL_SECS"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_format,
            currency_code,
            denominations,
            variance_alert_threshold,
            idempotency_ttl_hours,
            invariant_check_interval_secs,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Settings the ledger handlers need at runtime
    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            denominations: self.denominations.clone(),
            variance_alert_threshold: self.variance_alert_threshold,
            idempotency_ttl: Duration::hours(self.idempotency_ttl_hours),
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        None => Ok(default),
    }
}

/// Runtime settings shared by the handlers
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub denominations: DenominationTable,
    pub variance_alert_threshold: Money,
    pub idempotency_ttl: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            denominations: DenominationTable::default(),
            variance_alert_threshold: Money::new(rust_decimal::Decimal::new(1000, 2)).unwrap_or(Money::ZERO),
            idempotency_ttl: Duration::hours(24),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
