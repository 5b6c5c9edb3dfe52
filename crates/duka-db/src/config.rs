//! # Back-Office Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DUKA_DATABASE_PATH=/var/lib/duka/duka.db                           │
//! │     DUKA_BUSY_TIMEOUT_SECS=5                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     duka.toml                                                          │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "duka.db"
//! max_connections = 5
//! busy_timeout_secs = 5
//!
//! [inventory]
//! default_safety_stock = 5
//!
//! [payments]
//! control_number_validity_days = 7
//! payment_method = "GePG"
//!
//! [otp]
//! code_length = 6
//! expiry_minutes = 5
//!
//! [shipping]
//! default_method = "STANDARD"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pool::DbConfig;

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// `[database]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a transaction waits for the write lock before the
    /// operation fails with a concurrency conflict.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("duka.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout() -> u64 {
    5
}
fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// `[inventory]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySettings {
    #[serde(default = "default_safety_stock")]
    pub default_safety_stock: i64,
}

fn default_safety_stock() -> i64 {
    duka_core::DEFAULT_SAFETY_STOCK
}

impl Default for InventorySettings {
    fn default() -> Self {
        InventorySettings {
            default_safety_stock: default_safety_stock(),
        }
    }
}

/// `[payments]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    #[serde(default = "default_validity_days")]
    pub control_number_validity_days: i64,

    /// Label stored on every control-number payment.
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

fn default_validity_days() -> i64 {
    7
}
fn default_payment_method() -> String {
    "GePG".to_string()
}

impl Default for PaymentSettings {
    fn default() -> Self {
        PaymentSettings {
            control_number_validity_days: default_validity_days(),
            payment_method: default_payment_method(),
        }
    }
}

/// `[otp]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSettings {
    #[serde(default = "default_code_length")]
    pub code_length: usize,

    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: i64,
}

fn default_code_length() -> usize {
    6
}
fn default_expiry_minutes() -> i64 {
    5
}

impl Default for OtpSettings {
    fn default() -> Self {
        OtpSettings {
            code_length: default_code_length(),
            expiry_minutes: default_expiry_minutes(),
        }
    }
}

/// `[shipping]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingSettings {
    #[serde(default = "default_shipping_method")]
    pub default_method: String,
}

fn default_shipping_method() -> String {
    "STANDARD".to_string()
}

impl Default for ShippingSettings {
    fn default() -> Self {
        ShippingSettings {
            default_method: default_shipping_method(),
        }
    }
}

// =============================================================================
// DukaConfig
// =============================================================================

/// Complete back-office configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DukaConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub inventory: InventorySettings,

    #[serde(default)]
    pub payments: PaymentSettings,

    #[serde(default)]
    pub otp: OtpSettings,

    #[serde(default)]
    pub shipping: ShippingSettings,
}

impl DukaConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file, when given and present
    /// 3. `DUKA_*` environment variables
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                info!(?path, "Loading config from file");
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            Some(path) => {
                debug!(?path, "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies `DUKA_*` overrides looked up through `lookup`.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring unparseable environment override");
                    None
                }
            }
        }

        if let Some(path) = lookup("DUKA_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
        if let Some(v) = parsed("DUKA_MAX_CONNECTIONS", lookup("DUKA_MAX_CONNECTIONS")) {
            self.database.max_connections = v;
        }
        if let Some(v) = parsed("DUKA_BUSY_TIMEOUT_SECS", lookup("DUKA_BUSY_TIMEOUT_SECS")) {
            self.database.busy_timeout_secs = v;
        }
        if let Some(v) = parsed("DUKA_SAFETY_STOCK", lookup("DUKA_SAFETY_STOCK")) {
            self.inventory.default_safety_stock = v;
        }
        if let Some(v) = parsed(
            "DUKA_CONTROL_NUMBER_VALIDITY_DAYS",
            lookup("DUKA_CONTROL_NUMBER_VALIDITY_DAYS"),
        ) {
            self.payments.control_number_validity_days = v;
        }
        if let Some(v) = parsed("DUKA_OTP_EXPIRY_MINUTES", lookup("DUKA_OTP_EXPIRY_MINUTES")) {
            self.otp.expiry_minutes = v;
        }
        if let Some(method) = lookup("DUKA_SHIPPING_METHOD") {
            self.shipping.default_method = method;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.inventory.default_safety_stock < 0 {
            return Err(ConfigError::Invalid(
                "inventory.default_safety_stock must not be negative".into(),
            ));
        }
        if self.payments.control_number_validity_days <= 0 {
            return Err(ConfigError::Invalid(
                "payments.control_number_validity_days must be positive".into(),
            ));
        }
        if !(4..=10).contains(&self.otp.code_length) {
            return Err(ConfigError::Invalid(
                "otp.code_length must be between 4 and 10".into(),
            ));
        }
        if self.otp.expiry_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "otp.expiry_minutes must be positive".into(),
            ));
        }
        if self.shipping.default_method.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "shipping.default_method must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Pool configuration for [`crate::Database::connect`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .connect_timeout(Duration::from_secs(self.database.acquire_timeout_secs))
            .busy_timeout(Duration::from_secs(self.database.busy_timeout_secs))
    }
}
