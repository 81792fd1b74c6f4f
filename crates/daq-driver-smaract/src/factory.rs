//! DriverFactory for SmarAct MCS2 stages.
//!
//! # Example Configuration
//!
//! ```toml
//! [[stages]]
//! type = "smaract_mcs2"
//! address = "usb:sn:MCS2-00001234_Ch1-3"
//! poll_interval_ms = 50
//! settle_timeout_secs = 120
//! auto_connect = true
//! ```

use crate::address::StageAddress;
use crate::driver::{McsDriver, DRIVER_NAME};
use crate::stage::Mcs2Stage;
use anyhow::{anyhow, Context, Result};
use daq_core::capabilities::{DeviceCategory, MultiAxisStage};
use daq_core::driver::{Capability, DeviceComponents, DriverFactory};
use daq_core::stage::MotionConfig;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted settle poll interval.
pub const MAX_POLL_INTERVAL_MS: u64 = 1000;

/// Configuration of one MCS2 stage.
#[derive(Debug, Clone, Deserialize)]
pub struct Mcs2StageConfig {
    /// Logical stage address, e.g. `"usb:sn:MCS2-00001234_Ch4-6"`
    pub address: String,

    /// Delay between settle polls (default: 50 ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Settle bound in seconds (default: 120, 0 = wait indefinitely)
    #[serde(default)]
    pub settle_timeout_secs: Option<u64>,

    /// Connect while building (default: false)
    #[serde(default)]
    pub auto_connect: bool,
}

fn default_poll_interval_ms() -> u64 {
    MotionConfig::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Mcs2StageConfig {
    /// Poll interval and settle bound for the stage.
    pub fn motion_config(&self) -> MotionConfig {
        let timeout = match self.settle_timeout_secs {
            None => Some(MotionConfig::DEFAULT_SETTLE_TIMEOUT),
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };
        MotionConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_settle_timeout(timeout)
    }

    fn check(&self) -> Result<()> {
        StageAddress::parse(&self.address)?;
        if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(anyhow!(
                "poll_interval_ms must be at most {MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            ));
        }
        Ok(())
    }
}

static MCS2_CAPABILITIES: &[Capability] = &[Capability::Stage];

/// Builds [`Mcs2Stage`]s sharing one [`McsDriver`].
pub struct Mcs2StageFactory {
    driver: McsDriver,
}

impl Mcs2StageFactory {
    /// Factory building stages on `driver`.
    pub fn new(driver: McsDriver) -> Self {
        Self { driver }
    }
}

impl DriverFactory for Mcs2StageFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_NAME
    }

    fn name(&self) -> &'static str {
        "SmarAct MCS2 Piezo Stage"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MCS2_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Mcs2StageConfig = config.clone().try_into()?;
        cfg.check()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        let driver = self.driver.clone();
        Box::pin(async move {
            let cfg: Mcs2StageConfig = config.try_into().context("Invalid MCS2 stage config")?;
            cfg.check()?;

            let stage = Mcs2Stage::new(driver, &cfg.address)?.with_motion_config(cfg.motion_config());
            if cfg.auto_connect {
                stage
                    .connect()
                    .await
                    .with_context(|| format!("Failed to connect {}", cfg.address))?;
            }
            tracing::debug!(address = %cfg.address, "Built MCS2 stage");

            let stage: Arc<dyn MultiAxisStage> = Arc::new(stage);
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Stage)
                .with_stage(stage))
        })
    }
}
