//! Static identification and configuration data reported by the simulated balance.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// Descriptive data the instrument reports for identification queries.
///
/// Built once and read-only afterwards. Every field has a default, so a
/// profile file only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InstrumentProfile {
    pub make: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub serial_number: String,
    pub firmware_rev: String,
    pub configuration: Configuration,
}

/// Values answered by the `M..` configuration queries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub weigh_mode: String,
    pub environmental_stability: String,
    pub auto_zero_mode: String,
    pub standby_timeout: String,
}

impl Default for InstrumentProfile {
    fn default() -> Self {
        Self {
            make: "Mettler Toledo".into(),
            model: "SimModel".into(),
            kind: "SimType".into(),
            serial_number: "X12345678".into(),
            firmware_rev: "SIM.0.0.0".into(),
            configuration: Configuration::default(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            weigh_mode: "0".into(),
            environmental_stability: "2".into(),
            auto_zero_mode: "1".into(),
            standby_timeout: "0".into(),
        }
    }
}

impl InstrumentProfile {
    /// Parses a profile from TOML text.
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Loads a profile from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: origin.clone(),
            source,
        })?;
        Self::from_toml(&text, &origin)
    }
}
