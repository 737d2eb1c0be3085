//! Environment configuration, read once at start-up.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use thiserror::Error;

use stockflow_infra::command_dispatcher::RetryPolicy;
use stockflow_infra::fulfillment::EngineSettings;
use stockflow_shipping::ShippingCalendar;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind: SocketAddr,
    /// Postgres event store when set and the `postgres` feature is compiled in.
    pub database_url: Option<String>,
    /// `None` disables reservation holds.
    pub reservation_hold: Option<Duration>,
    pub sweep_interval: Duration,
    pub shipping_cutoff: NaiveTime,
    pub slot_horizon_days: u32,
    pub ledger_max_attempts: u32,
    pub ledger_backoff: Duration,
    pub lock_timeout: Duration,
    pub seed_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            reservation_hold: Some(Duration::from_secs(1800)),
            sweep_interval: Duration::from_secs(30),
            shipping_cutoff: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            slot_horizon_days: 14,
            ledger_max_attempts: 8,
            ledger_backoff: Duration::from_millis(2),
            lock_timeout: Duration::from_millis(2000),
            seed_file: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset or blank variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let hold_secs: u64 = parse_or(&var, "STOCKFLOW_RESERVATION_HOLD_SECS", 1800)?;

        Ok(Self {
            bind: parse_or(&var, "STOCKFLOW_BIND", defaults.bind)?,
            database_url: var("DATABASE_URL"),
            reservation_hold: (hold_secs > 0).then(|| Duration::from_secs(hold_secs)),
            sweep_interval: Duration::from_secs(
                parse_or(&var, "STOCKFLOW_SWEEP_INTERVAL_SECS", 30u64)?.max(1),
            ),
            shipping_cutoff: match var("STOCKFLOW_SHIPPING_CUTOFF") {
                Some(v) => NaiveTime::parse_from_str(v.trim(), "%H:%M").map_err(|e| {
                    ConfigError::Invalid {
                        var: "STOCKFLOW_SHIPPING_CUTOFF",
                        value: v.clone(),
                        reason: e.to_string(),
                    }
                })?,
                None => defaults.shipping_cutoff,
            },
            slot_horizon_days: parse_or(&var, "STOCKFLOW_SLOT_HORIZON_DAYS", 14u32)?,
            ledger_max_attempts: parse_or(&var, "STOCKFLOW_LEDGER_MAX_ATTEMPTS", 8u32)?.max(1),
            ledger_backoff: Duration::from_millis(parse_or(&var, "STOCKFLOW_LEDGER_BACKOFF_MS", 2u64)?),
            lock_timeout: Duration::from_millis(parse_or(&var, "STOCKFLOW_LOCK_TIMEOUT_MS", 2000u64)?),
            seed_file: var("STOCKFLOW_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            reservation_hold: self.reservation_hold,
            calendar: ShippingCalendar::new(self.shipping_cutoff, self.slot_horizon_days),
            ledger_retry: RetryPolicy {
                max_attempts: self.ledger_max_attempts,
                base_backoff: self.ledger_backoff,
            },
            lock_timeout: self.lock_timeout,
        }
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
