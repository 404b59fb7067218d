//! Application configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Bot configuration.
///
/// Reads from environment variables:
/// - `BOT_TOKEN`: Telegram bot token (required)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `MANAGER_CHAT_ID`: chat receiving paid orders (required)
/// - `MONITOR_CHAT_ID`: chat receiving health reports
/// - `ORDER_EXPIRY_MINUTES`: age at which unfulfilled orders expire (default: `30`)
/// - `SWEEP_INTERVAL_SECS`: expiry sweep period (default: `1800`)
/// - `HEALTH_INTERVAL_SECS`: health check period (default: `1800`)
/// - `STRICT_ADD_ONS`: only allow add-ons linked to the drink (default: `false`)
/// - `PAYMENT_PROVIDER_TOKEN`: Telegram payments provider token
/// - `DB_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `METRICS_ADDR`: Prometheus listen address
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub database_url: String,
    pub manager_chat_id: i64,
    pub monitor_chat_id: Option<i64>,
    pub order_expiry: chrono::Duration,
    pub sweep_interval: Duration,
    pub health_interval: Duration,
    pub strict_add_ons: bool,
    pub payment_provider_token: Option<String>,
    pub db_max_connections: u32,
    pub metrics_addr: Option<SocketAddr>,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("manager_chat_id", &self.manager_chat_id)
            .field("monitor_chat_id", &self.monitor_chat_id)
            .field("order_expiry", &self.order_expiry)
            .field("sweep_interval", &self.sweep_interval)
            .field("health_interval", &self.health_interval)
            .field("strict_add_ons", &self.strict_add_ons)
            .field("payments", &self.payment_provider_token.is_some())
            .field("db_max_connections", &self.db_max_connections)
            .field("metrics_addr", &self.metrics_addr)
            .field("log_filter", &self.log_filter)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let expiry_minutes: i64 = parse_or(&var, "ORDER_EXPIRY_MINUTES", 30)?;
        if expiry_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "ORDER_EXPIRY_MINUTES",
                value: expiry_minutes.to_string(),
            });
        }

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            bot_token: required("BOT_TOKEN")?,
            database_url: required("DATABASE_URL")?,
            manager_chat_id: parse(&var, "MANAGER_CHAT_ID")?
                .ok_or(ConfigError::Missing("MANAGER_CHAT_ID"))?,
            monitor_chat_id: parse(&var, "MONITOR_CHAT_ID")?,
            order_expiry: chrono::Duration::minutes(expiry_minutes),
            sweep_interval: Duration::from_secs(parse_or(&var, "SWEEP_INTERVAL_SECS", 1800)?),
            health_interval: Duration::from_secs(parse_or(&var, "HEALTH_INTERVAL_SECS", 1800)?),
            strict_add_ons: parse_or(&var, "STRICT_ADD_ONS", false)?,
            payment_provider_token: var("PAYMENT_PROVIDER_TOKEN"),
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 5)?,
            metrics_addr: parse(&var, "METRICS_ADDR")?,
            log_filter: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(key)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: key,
                value: value.clone(),
            })
        })
        .transpose()
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse(var, key)?.unwrap_or(default))
}
