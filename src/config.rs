//! Unit configuration
//!
//! One [`UnitConfig`] describes one ventilation unit behind one gateway.
//! Values are layered with figment, later sources overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. TOML file
//! 3. environment variables prefixed with `VENT_` (`VENT_HOST`, `VENT_UNIT_ID`, ...)
//!
//! ```toml
//! host = "192.168.1.50"
//! unit_id = 1
//! model = "save"
//! unit_variant = "VTR 300"
//! gateway_profile = "save_connect"
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::find_unit_variant;
use crate::profile::{GatewayProfile, ProfileKind};
use crate::register_map::DeviceModel;
use crate::{DEFAULT_TCP_PORT, DEFAULT_UNIT_ID};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "VENT_";

const MAX_UNIT_ID: u8 = 247;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Connection and model settings of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub poll_interval_secs: u64,
    pub model: DeviceModel,
    /// Unit variant name, e.g. `"VTR 300"`; selects the nominal air flow.
    pub unit_variant: Option<String>,
    pub gateway_profile: ProfileKind,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_TCP_PORT,
            unit_id: DEFAULT_UNIT_ID,
            poll_interval_secs: 10,
            model: DeviceModel::default(),
            unit_variant: None,
            gateway_profile: ProfileKind::default(),
        }
    }
}

impl UnitConfig {
    /// Defaults overlaid with the environment only.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(UnitConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load from `path` plus environment, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: UnitConfig = Figment::new()
            .merge(Serialized::defaults(UnitConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        Ok(config)
    }

    /// Load from defaults and environment only, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: UnitConfig = Self::figment().extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "must not be empty"));
        }
        if !(1..=MAX_UNIT_ID).contains(&self.unit_id) {
            return Err(ConfigError::invalid(
                "unit_id",
                format!("{} is outside 1..={}", self.unit_id, MAX_UNIT_ID),
            ));
        }
        if self.poll_interval_secs < 1 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be at least 1"));
        }
        if let Some(name) = &self.unit_variant {
            if find_unit_variant(name).is_none() {
                return Err(ConfigError::invalid(
                    "unit_variant",
                    format!("unknown unit variant '{}'", name),
                ));
            }
        }
        Ok(())
    }

    /// Nominal max air flow of the configured unit variant, if any.
    pub fn nominal_max_flow(&self) -> Option<u16> {
        self.unit_variant
            .as_deref()
            .and_then(find_unit_variant)
            .and_then(|v| v.nominal_max_flow)
    }

    pub fn profile(&self) -> GatewayProfile {
        self.gateway_profile.profile()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
