//! Simulator configuration.
//!
//! ```toml
//! [simulator]
//! enabled = true
//! mode = "realistic"
//! settle_polls = 3
//!
//! [[simulator.devices]]
//! locator = "usb:sn:MCS2-00001234"
//! modules = 2
//!
//! [[simulator.devices]]
//! locator = "usb:sn:MCS2-00005678"
//! modules = 1
//! sensors = ["SL...S1SS", "SL...S1SS", "SR...S1SS"]
//! ```

use crate::common::MockMode;
use crate::mock_mcs::MockDevice;
use serde::{Deserialize, Serialize};

/// `[simulator]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Use the simulator instead of the vendor library
    pub enabled: bool,
    /// Timing model
    pub mode: MockMode,
    /// Status reads a move stays active for (Instant/Chaos)
    pub settle_polls: u32,
    /// Random failure rate for every library call (0.0 - 1.0)
    pub failure_rate: f64,
    /// Seed for random failures
    pub seed: Option<u64>,
    /// Simulated controllers
    pub devices: Vec<SimulatedDevice>,
}

impl SimulatorConfig {
    /// Check rates, locators, module counts and start positions.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(format!(
                "simulator.failure_rate must be within 0.0..=1.0, got {}",
                self.failure_rate
            ));
        }
        for device in &self.devices {
            if device.locator.trim().is_empty() {
                return Err("simulator device locator must not be empty".to_string());
            }
            if let Some(um) = device.positions.iter().find(|um| !um.is_finite()) {
                return Err(format!(
                    "simulator device '{}' has a non-finite start position {um}",
                    device.locator
                ));
            }
            if !(1..=2).contains(&device.modules) {
                return Err(format!(
                    "simulator device '{}' must have 1 or 2 modules, got {}",
                    device.locator, device.modules
                ));
            }
        }
        Ok(())
    }
}

/// One `[[simulator.devices]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDevice {
    /// Locator reported by device discovery
    pub locator: String,
    /// Bus modules (1 or 2)
    #[serde(default = "default_modules")]
    pub modules: i32,
    /// Positioner types by channel index; missing channels keep the default
    #[serde(default)]
    pub sensors: Vec<String>,
    /// Start positions (um) by channel index
    #[serde(default)]
    pub positions: Vec<f64>,
}

fn default_modules() -> i32 {
    2
}

impl SimulatedDevice {
    /// Controller built from this entry.
    pub fn to_mock_device(&self) -> MockDevice {
        let mut device = MockDevice::with_modules(self.locator.clone(), self.modules);
        for (channel, sensor) in (0u32..).zip(&self.sensors) {
            device = device.with_sensor(channel, sensor.clone());
        }
        for (channel, um) in (0u32..).zip(&self.positions) {
            device = device.with_position(channel, *um);
        }
        device
    }
}
