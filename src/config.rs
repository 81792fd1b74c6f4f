//! Configuration System using Figment
//!
//! Strongly-typed application configuration. Loaded from:
//! 1. `photonic_daq.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `PHOTONIC_DAQ_`; nested keys are
//!    separated by a double underscore
//!
//! Every section has defaults, so an empty or missing file yields a usable
//! configuration (real hardware, no preconfigured stages).
//!
//! # Example
//! ```no_run
//! use photonic_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Log level: {}", config.application.log_level);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ```toml
//! [application]
//! log_level = "debug"
//! log_format = "compact"
//!
//! [motion]
//! poll_interval_ms = 20
//! settle_timeout_secs = 60
//!
//! [simulator]
//! enabled = true
//!
//! [[simulator.devices]]
//! locator = "usb:sn:MCS2-00001234"
//!
//! [[stages]]
//! type = "smaract_mcs2"
//! address = "usb:sn:MCS2-00001234_Ch1-3"
//! ```

use crate::logging::{parse_log_level, OutputFormat};
use daq_core::error::{AppResult, DaqError};
use daq_core::stage::MotionConfig;
use daq_driver_mock::SimulatorConfig;
use daq_driver_smaract::factory::MAX_POLL_INTERVAL_MS;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Configuration file read by [`AppConfig::load`].
pub const DEFAULT_CONFIG_PATH: &str = "photonic_daq.toml";

/// Prefix of environment overrides, e.g. `PHOTONIC_DAQ_APPLICATION__LOG_LEVEL=debug`.
pub const ENV_PREFIX: &str = "PHOTONIC_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Defaults for stages without their own motion settings
    #[serde(default)]
    pub motion: MotionSettings,
    /// Simulated MCS2 controllers
    #[serde(default)]
    pub simulator: SimulatorConfig,
    /// Stage definitions, one driver factory table each
    #[serde(default)]
    pub stages: Vec<toml::Value>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Settle polling defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Delay between settle polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Settle bound in seconds (0 = wait indefinitely)
    #[serde(default = "default_settle_timeout_secs")]
    pub settle_timeout_secs: u64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_timeout_secs: default_settle_timeout_secs(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    MotionConfig::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_settle_timeout_secs() -> u64 {
    MotionConfig::DEFAULT_SETTLE_TIMEOUT.as_secs()
}

impl AppConfig {
    /// Load configuration from `photonic_daq.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        parse_log_level(&self.application.log_level).map_err(DaqError::Configuration)?;

        if self.motion.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(DaqError::Configuration(format!(
                "motion.poll_interval_ms must be at most {MAX_POLL_INTERVAL_MS}, got {}",
                self.motion.poll_interval_ms
            )));
        }

        self.simulator
            .validate()
            .map_err(DaqError::Configuration)?;

        // Stage entries need a type and a unique address
        let mut addresses = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            let table = stage.as_table().ok_or_else(|| {
                DaqError::Configuration(format!("stages[{index}] must be a table"))
            })?;
            if !table.get("type").is_some_and(toml::Value::is_str) {
                return Err(DaqError::Configuration(format!(
                    "stages[{index}] is missing a 'type' string"
                )));
            }
            if let Some(address) = table.get("address").and_then(toml::Value::as_str) {
                if !addresses.insert(address) {
                    return Err(DaqError::Configuration(format!(
                        "Duplicate stage address: {address}"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load_from("/nonexistent/photonic_daq.toml").unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.application.log_format, OutputFormat::Pretty);
        assert_eq!(config.motion.poll_interval_ms, 50);
        assert_eq!(config.motion.settle_timeout_secs, 120);
        assert!(!config.simulator.enabled);
        assert!(config.stages.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_file() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"
            log_format = "json"

            [motion]
            poll_interval_ms = 10

            [simulator]
            enabled = true
            settle_polls = 2

            [[simulator.devices]]
            locator = "usb:sn:MCS2-1"

            [[stages]]
            type = "smaract_mcs2"
            address = "usb:sn:MCS2-1_Ch1-3"
            auto_connect = true
            "#,
        );

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert_eq!(config.motion.poll_interval_ms, 10);
        assert_eq!(config.motion.settle_timeout_secs, 120);
        assert!(config.simulator.enabled);
        assert_eq!(config.simulator.devices.len(), 1);
        assert_eq!(config.simulator.devices[0].modules, 2);
        assert_eq!(
            config.stages[0].get("address").and_then(|v| v.as_str()),
            Some("usb:sn:MCS2-1_Ch1-3")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_poll_interval_bound() {
        let mut config = AppConfig::default();
        config.motion.poll_interval_ms = MAX_POLL_INTERVAL_MS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_stage_addresses() {
        let file = write_config(
            r#"
            [[stages]]
            type = "smaract_mcs2"
            address = "LOC_Ch1-3"

            [[stages]]
            type = "smaract_mcs2"
            address = "LOC_Ch1-3"
            "#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate stage address"));
    }

    #[test]
    fn test_stage_without_type() {
        let file = write_config(
            r#"
            [[stages]]
            address = "LOC_Ch1-3"
            "#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulator_section_is_validated() {
        let mut config = AppConfig::default();
        config.simulator.failure_rate = 2.0;
        assert!(config.validate().is_err());
    }
}
