//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;

use courier_infra::config::{ExportConfig, LeasePolicy, QueueConfig};

const DEV_JWT_SECRET: &str = "dev-secret";
const DEV_WORKER_KEY: &str = "dev-worker-key";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub worker_api_key: String,
    /// Postgres when set; in-memory otherwise.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub queue: QueueConfig,
}

impl AppConfig {
    /// In-memory configuration with the given credentials and default queue tuning.
    pub fn new(jwt_secret: impl Into<String>, worker_api_key: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: jwt_secret.into(),
            worker_api_key: worker_api_key.into(),
            database_url: None,
            database_max_connections: 10,
            queue: QueueConfig::default(),
        }
    }

    /// Load from the process environment (a `.env` file is honoured if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });
        let worker_api_key = get("WORKER_API_KEY").unwrap_or_else(|| {
            tracing::warn!("WORKER_API_KEY not set; using insecure dev default");
            DEV_WORKER_KEY.to_string()
        });

        let lease = LeasePolicy {
            default_seconds: parse(&get, "LEASE_DEFAULT_SECONDS", 120)?,
            max_seconds: parse(&get, "LEASE_MAX_SECONDS", 3600)?,
        };
        if lease.max_seconds == 0 {
            return Err(invalid("LEASE_MAX_SECONDS", "0", "must be at least 1"));
        }
        if lease.default_seconds == 0 || lease.default_seconds > lease.max_seconds {
            return Err(invalid(
                "LEASE_DEFAULT_SECONDS",
                &lease.default_seconds.to_string(),
                &format!("must be between 1 and LEASE_MAX_SECONDS ({})", lease.max_seconds),
            ));
        }

        let page_size: u32 = parse(&get, "EXPORT_PAGE_SIZE", 500)?;
        if page_size == 0 {
            return Err(invalid("EXPORT_PAGE_SIZE", "0", "must be at least 1"));
        }

        Ok(Self {
            bind_addr: parse(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            jwt_secret,
            worker_api_key,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            queue: QueueConfig {
                lease,
                export: ExportConfig { page_size },
            },
        })
    }
}

impl core::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("database_max_connections", &self.database_max_connections)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
