//! Process configuration, loaded from a TOML file.
//!
//! ```toml
//! [gateway]
//! base_url = "https://accept.paymob.com/api"
//! api_key = "..."            # or PAYMOB_API_KEY
//! hmac_secret = "..."        # or PAYMOB_HMAC_SECRET
//! integration_id = 4097558
//! iframe_id = "853472"
//!
//! [sweeper]
//! interval_secs = 3600
//!
//! [booking]
//! reservation_days = 7
//! ```

use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::Deserialize;
use thiserror::Error;

use crate::ledger::DEFAULT_RESERVATION_DAYS;

pub const API_KEY_ENV: &str = "PAYMOB_API_KEY";
pub const HMAC_SECRET_ENV: &str = "PAYMOB_HMAC_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub booking: BookingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub hmac_secret: String,
    pub integration_id: i64,
    pub iframe_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Lifetime of an issued payment token
    #[serde(default = "default_token_expiration")]
    pub token_expiration_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    #[serde(default = "default_reservation_days")]
    pub reservation_days: i64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            reservation_days: default_reservation_days(),
        }
    }
}

fn default_base_url() -> String {
    "https://accept.paymob.com/api".to_string()
}

fn default_currency() -> String {
    "EGP".to_string()
}

fn default_token_expiration() -> u64 {
    3600
}

fn default_timeout() -> u64 {
    15
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_reservation_days() -> i64 {
    DEFAULT_RESERVATION_DAYS
}

impl Config {
    /// Read `path`, apply secret overrides from the environment, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Replace secrets with values from `lookup` when present.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.gateway.api_key = key;
        }
        if let Some(secret) = lookup(HMAC_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.gateway.hmac_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.api_key.is_empty() {
            return Err(ConfigError::Missing("gateway.api_key"));
        }
        if self.gateway.hmac_secret.is_empty() {
            return Err(ConfigError::Missing("gateway.hmac_secret"));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::NotPositive("sweeper.interval_secs"));
        }
        if self.booking.reservation_days <= 0 {
            return Err(ConfigError::NotPositive("booking.reservation_days"));
        }
        Ok(())
    }
}
