//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.

use crate::error::{Error, Result};
use crate::queue::{DEFAULT_BUSY_TIMEOUT, MAX_BUSY_TIMEOUT, QUEUE_FILE_NAME};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub profile_dir: PathBuf,
    pub busy_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let busy_timeout = match std::env::var("SYNCQ_BUSY_TIMEOUT_SECS") {
            Ok(raw) => parse_busy_timeout(&raw)?,
            Err(_) => DEFAULT_BUSY_TIMEOUT,
        };

        Ok(Self {
            profile_dir: PathBuf::from(required_var("SYNCQ_PROFILE_DIR")?),
            busy_timeout,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Location of the queue database inside the profile directory.
    pub fn queue_path(&self) -> PathBuf {
        self.profile_dir.join(QUEUE_FILE_NAME)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parse_busy_timeout(raw: &str) -> Result<Duration> {
    let secs: u64 = raw.trim().parse().map_err(|_| {
        Error::Config(format!("SYNCQ_BUSY_TIMEOUT_SECS must be whole seconds, got {raw:?}"))
    })?;
    let max_secs = MAX_BUSY_TIMEOUT.as_secs();
    if secs > max_secs {
        return Err(Error::Config(format!(
            "SYNCQ_BUSY_TIMEOUT_SECS must be at most {max_secs}, got {secs}"
        )));
    }
    Ok(Duration::from_secs(secs))
}
