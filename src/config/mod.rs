//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod tunables;

pub use tunables::Tunables;

use crate::error::{Error, Result};
use crate::lane::Lane;
use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Broker address. Optional here; `Broker::connect` refuses to run without it.
    pub amqp_url: Option<SecretString>,
    /// Shared key-value store for distributed locks.
    pub redis_url: Option<SecretString>,
    /// Base URL of the service registry (`GET {base}/v1/routes`).
    pub registry_url: Option<String>,
    /// Environment default lane; "prod" and unset both mean no lane.
    pub lane: Option<Lane>,
    pub anthropic_api_key: Option<SecretString>,
    pub extraction_model: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub tunables_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, the deployment provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            amqp_url: optional_var("AMQP_URL").map(SecretString::from),
            redis_url: optional_var("REDIS_URL").map(SecretString::from),
            registry_url: optional_var("REGISTRY_URL"),
            lane: optional_var("LANE").and_then(Lane::new),
            anthropic_api_key: optional_var("ANTHROPIC_API_KEY").map(SecretString::from),
            extraction_model: optional_var("EXTRACTION_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            tunables_path: optional_var("LANEWORK_CONFIG").map(PathBuf::from),
        })
    }

    /// Load the tunables file named by `LANEWORK_CONFIG`, or the defaults.
    pub fn tunables(&self) -> Result<Tunables> {
        match &self.tunables_path {
            Some(path) => Tunables::load(path),
            None => Ok(Tunables::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are the same thing.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
