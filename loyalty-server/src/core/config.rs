//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::accrual::WorkerConfig;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment: development | staging | production
    pub environment: String,
    /// Address the HTTP API listens on
    pub run_address: SocketAddr,
    /// PostgreSQL connection URI; `None` selects the in-memory store
    pub database_uri: Option<String>,
    /// Base URL of the accrual system
    pub accrual_address: String,
    pub accrual_timeout: Duration,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub log_level: String,
    /// Daily rolling log files go here when set
    pub log_dir: Option<String>,
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, BoxError> {
        let environment = var("ENVIRONMENT").unwrap_or_else(|| "development".into());
        let is_dev = environment == "development";

        let database_uri = var("DATABASE_URI").filter(|s| !s.is_empty());
        if database_uri.is_none() && !is_dev {
            return Err(format!("DATABASE_URI must be set in {environment} environment").into());
        }

        let run_address = var("RUN_ADDRESS").unwrap_or_else(|| "127.0.0.1:8080".into());
        let run_address = run_address
            .parse()
            .map_err(|e| format!("invalid RUN_ADDRESS {run_address}: {e}"))?;

        let defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            poll_interval: millis(&var, "ACCRUAL_POLL_INTERVAL_MS", defaults.poll_interval)?,
            batch_limit: number(&var, "ACCRUAL_BATCH_LIMIT", defaults.batch_limit)?,
            rate_interval: millis(&var, "ACCRUAL_RATE_INTERVAL_MS", defaults.rate_interval)?,
            rate_burst: number(&var, "ACCRUAL_RATE_BURST", defaults.rate_burst)?,
            cooldown: millis(&var, "ACCRUAL_COOLDOWN_MS", defaults.cooldown)?,
            backoff_step: millis(&var, "ACCRUAL_BACKOFF_STEP_MS", defaults.backoff_step)?,
            shutdown_timeout: millis(&var, "SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout)?,
        };
        worker.validate()?;

        Ok(Self {
            run_address,
            database_uri,
            accrual_address: var("ACCRUAL_SYSTEM_ADDRESS")
                .unwrap_or_else(|| "http://127.0.0.1:8081".into()),
            accrual_timeout: millis(&var, "ACCRUAL_TIMEOUT_MS", Duration::from_secs(5))?,
            jwt_secret: require_secret(&var, "JWT_SECRET", &environment)?,
            jwt_expiration_hours: number(&var, "JWT_EXPIRATION_HOURS", 24)?,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_dir: var("LOG_DIR").filter(|s| !s.is_empty()),
            environment,
            worker,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

/// Require a secret: must be set and non-empty in non-development environments.
fn require_secret(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    environment: &str,
) -> Result<String, BoxError> {
    let val = match var(name) {
        Some(v) => v,
        None => {
            if environment != "development" {
                return Err(format!("{name} must be set in {environment} environment").into());
            }
            format!("dev-{name}-not-for-production")
        }
    };
    if val.is_empty() && environment != "development" {
        return Err(format!("{name} must not be empty in {environment} environment").into());
    }
    Ok(val)
}

fn number<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, BoxError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {name} {raw:?}: {e}").into()),
        None => Ok(default),
    }
}

fn millis(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, BoxError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    number(var, name, default_ms).map(Duration::from_millis)
}
