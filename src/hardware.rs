//! Composition root for the stage layer.
//!
//! Chooses the MCS2 capability provider (simulator or unavailable), registers
//! the driver factories and turns addresses into ready stages.
//!
//! The vendor library binding is not part of this crate. Without
//! `[simulator] enabled = true` the driver is reported as unavailable and
//! every stage operation fails with `DriverUnavailable`.

use crate::config::{AppConfig, MotionSettings};
use anyhow::{anyhow, bail, Context, Result};
use daq_core::capabilities::MultiAxisStage;
use daq_core::driver::DriverFactory;
use daq_driver_mock::MockMcsController;
use daq_driver_smaract::{
    find_stage_addresses, ChannelGroup, Mcs2StageFactory, McsDriver, Ownership, StageAddress,
    DRIVER_NAME,
};
use std::sync::Arc;

const NO_BINDING: &str =
    "no MCS2 control library binding is configured; enable [simulator] to run without hardware";

/// Driver provider plus the factories building stages on top of it.
pub struct Hardware {
    driver: McsDriver,
    factories: Vec<Box<dyn DriverFactory>>,
    motion: MotionSettings,
    stages: Vec<toml::Value>,
}

/// A connected stage. Holds the owning stage of the controller as well when
/// `stage` borrows its session.
pub struct OpenStage {
    /// The requested stage
    pub stage: Arc<dyn MultiAxisStage>,
    // Declared after `stage` so the borrower is released first.
    owner: Option<Arc<dyn MultiAxisStage>>,
}

impl OpenStage {
    /// Whether an owner stage had to be connected on the way.
    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }
}

impl Hardware {
    /// Hardware from configuration. Validates every `[[stages]]` entry.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let driver = if config.simulator.enabled {
            tracing::info!(
                devices = config.simulator.devices.len(),
                mode = ?config.simulator.mode,
                "Using simulated MCS2 controllers"
            );
            McsDriver::loaded(Arc::new(MockMcsController::from_config(&config.simulator)))
        } else {
            tracing::warn!("{NO_BINDING}");
            McsDriver::unavailable(NO_BINDING)
        };
        Self::with_driver(driver, config)
    }

    /// Hardware on top of an existing driver.
    pub fn with_driver(driver: McsDriver, config: &AppConfig) -> Result<Self> {
        let factories: Vec<Box<dyn DriverFactory>> =
            vec![Box::new(Mcs2StageFactory::new(driver.clone()))];

        let hardware = Self {
            driver,
            factories,
            motion: config.motion.clone(),
            stages: config.stages.clone(),
        };
        for stage in &hardware.stages {
            hardware
                .factory_for(stage)?
                .validate(&hardware.with_motion_defaults(stage.clone()))
                .with_context(|| format!("Invalid stage entry: {stage}"))?;
        }
        Ok(hardware)
    }

    /// Driver shared by every stage.
    pub fn driver(&self) -> &McsDriver {
        &self.driver
    }

    /// Logical stage addresses of all connected dual-module controllers.
    pub fn discover(&self) -> Result<Vec<String>> {
        find_stage_addresses(&self.driver).context("Stage discovery failed")
    }

    /// Configured addresses, in file order.
    pub fn configured_addresses(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter_map(|s| s.get("address").and_then(toml::Value::as_str))
            .collect()
    }

    /// Factory config for `address`: its `[[stages]]` entry if there is one,
    /// otherwise an MCS2 entry using the `[motion]` defaults.
    pub fn stage_config(&self, address: &str) -> toml::Value {
        let configured = self
            .stages
            .iter()
            .find(|s| s.get("address").and_then(toml::Value::as_str) == Some(address))
            .cloned();

        let entry = configured.unwrap_or_else(|| {
            let mut table = toml::Table::new();
            table.insert("type".into(), toml::Value::String(DRIVER_NAME.into()));
            table.insert("address".into(), toml::Value::String(address.into()));
            toml::Value::Table(table)
        });
        self.with_motion_defaults(entry)
    }

    /// Build and connect the stage at `address`.
    ///
    /// A `_Ch4-6` stage borrows the session of `_Ch1-3` on the same
    /// controller, so that stage is connected first.
    pub async fn open_stage(&self, address: &str) -> Result<OpenStage> {
        let parsed = StageAddress::parse(address)?;

        let owner = match parsed.ownership() {
            Ownership::Owner => None,
            Ownership::Borrower => {
                let owner_address = ChannelGroup::Ch1To3.address_for(parsed.locator());
                tracing::debug!(%owner_address, "Connecting session owner first");
                Some(self.connect(&owner_address).await?)
            }
        };

        let stage = self.connect(address).await?;
        Ok(OpenStage { stage, owner })
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn MultiAxisStage>> {
        let config = self.stage_config(address);
        let components = self.factory_for(&config)?.build(config).await?;
        let stage = components
            .stage
            .ok_or_else(|| anyhow!("Driver built no stage for {address}"))?;
        stage
            .connect()
            .await
            .with_context(|| format!("Failed to connect {address}"))?;
        Ok(stage)
    }

    fn factory_for(&self, config: &toml::Value) -> Result<&dyn DriverFactory> {
        let driver_type = config
            .get("type")
            .and_then(toml::Value::as_str)
            .ok_or_else(|| anyhow!("Stage entry has no 'type'"))?;
        match self
            .factories
            .iter()
            .find(|f| f.driver_type() == driver_type)
        {
            Some(factory) => Ok(factory.as_ref()),
            None => bail!("Unknown stage type '{driver_type}'"),
        }
    }

    fn with_motion_defaults(&self, mut entry: toml::Value) -> toml::Value {
        if let Some(table) = entry.as_table_mut() {
            table
                .entry("poll_interval_ms")
                .or_insert_with(|| toml::Value::Integer(self.motion.poll_interval_ms as i64));
            table
                .entry("settle_timeout_secs")
                .or_insert_with(|| toml::Value::Integer(self.motion.settle_timeout_secs as i64));
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::error::StageError;
    use daq_driver_mock::SimulatedDevice;
    use tracing_test::traced_test;

    const LOC: &str = "usb:sn:MCS2-00001234";

    fn entry(source: &str) -> toml::Value {
        toml::from_str(source).unwrap()
    }

    fn simulated() -> AppConfig {
        let mut config = AppConfig::default();
        config.simulator.enabled = true;
        config.simulator.devices.push(SimulatedDevice {
            locator: LOC.to_string(),
            modules: 2,
            sensors: Vec::new(),
            positions: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        });
        config.motion.poll_interval_ms = 0;
        config
    }

    #[test]
    fn stage_config_falls_back_to_motion_defaults() {
        let hardware = Hardware::from_config(&simulated()).unwrap();
        let entry = hardware.stage_config(&format!("{LOC}_Ch1-3"));

        assert_eq!(entry.get("type").and_then(|v| v.as_str()), Some(DRIVER_NAME));
        assert_eq!(entry.get("poll_interval_ms").and_then(|v| v.as_integer()), Some(0));
        assert_eq!(
            entry.get("settle_timeout_secs").and_then(|v| v.as_integer()),
            Some(120)
        );
    }

    #[test]
    fn configured_entries_keep_their_settings() {
        let mut config = simulated();
        config.stages.push(entry(
            r#"
            type = "smaract_mcs2"
            address = "usb:sn:MCS2-00001234_Ch4-6"
            poll_interval_ms = 5
            "#,
        ));
        let hardware = Hardware::from_config(&config).unwrap();

        assert_eq!(hardware.configured_addresses(), vec![format!("{LOC}_Ch4-6")]);
        let entry = hardware.stage_config(&format!("{LOC}_Ch4-6"));
        assert_eq!(entry.get("poll_interval_ms").and_then(|v| v.as_integer()), Some(5));
    }

    #[test]
    fn invalid_stage_entries_are_rejected_up_front() {
        let mut config = simulated();
        config.stages.push(entry(
            r#"
            type = "smaract_mcs2"
            address = "usb:sn:MCS2-00001234"
            "#,
        ));
        assert!(Hardware::from_config(&config).is_err());

        let mut config = simulated();
        config.stages.push(entry(
            r#"
            type = "esp300"
            address = "COM3"
            "#,
        ));
        let err = Hardware::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown stage type"));
    }

    #[tokio::test]
    async fn borrower_opens_its_owner_first() {
        let hardware = Hardware::from_config(&simulated()).unwrap();
        let open = hardware.open_stage(&format!("{LOC}_Ch4-6")).await.unwrap();

        assert!(open.has_owner());
        let position = open.stage.position().await.unwrap();
        assert_eq!(position.to_array(), [4.0, 5.0, 6.0]);
        assert_eq!(hardware.driver().sessions().len(), 1);

        drop(open);
        assert!(hardware.driver().sessions().is_empty());
    }

    #[tokio::test]
    async fn owner_opens_alone() {
        let hardware = Hardware::from_config(&simulated()).unwrap();
        let open = hardware.open_stage(&format!("{LOC}_Ch1-3")).await.unwrap();

        assert!(!open.has_owner());
        assert_eq!(open.stage.position().await.unwrap().x, 1.0);
    }

    #[tokio::test]
    #[traced_test]
    async fn without_simulator_the_driver_is_unavailable() {
        let hardware = Hardware::from_config(&AppConfig::default()).unwrap();
        assert!(!hardware.driver().is_loaded());
        assert!(logs_contain("no MCS2 control library binding is configured"));

        let err = hardware
            .open_stage(&format!("{LOC}_Ch1-3"))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.root_cause().downcast_ref::<StageError>(),
            Some(StageError::DriverUnavailable { .. })
        ));
        assert!(hardware.discover().is_err());
    }

    #[test]
    #[traced_test]
    fn discovery_lists_simulated_controllers() {
        let hardware = Hardware::from_config(&simulated()).unwrap();
        assert!(logs_contain("Using simulated MCS2 controllers"));
        assert_eq!(
            hardware.discover().unwrap(),
            vec![format!("{LOC}_Ch1-3"), format!("{LOC}_Ch4-6")]
        );
    }
}
