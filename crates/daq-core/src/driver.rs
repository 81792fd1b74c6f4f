//! Configuration-driven construction of stages.
//!
//! Each driver family ships one [`DriverFactory`]. The application keeps a
//! list of factories, picks one by the `type` key of a `[[stages]]` entry and
//! hands it the whole entry as a `toml::Value`. The factory returns the stage
//! as a [`MultiAxisStage`] trait object inside [`DeviceComponents`], so the
//! caller never names the vendor type.
//!
//! ```rust,ignore
//! let factories: Vec<Box<dyn DriverFactory>> =
//!     vec![Box::new(Mcs2StageFactory::new(driver.clone()))];
//!
//! let entry: toml::Value = toml::from_str(r#"
//!     type = "smaract_mcs2"
//!     address = "usb:sn:MCS2-00001234_Ch1-3"
//! "#)?;
//! let factory = factories
//!     .iter()
//!     .find(|f| Some(f.driver_type()) == entry.get("type").and_then(|t| t.as_str()))
//!     .ok_or_else(|| anyhow!("unknown stage type"))?;
//! factory.validate(&entry)?;
//! let stage = factory.build(entry).await?.stage;
//! ```

use crate::capabilities::{DeviceCategory, MultiAxisStage};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a built device can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Three-axis positioning, see [`MultiAxisStage`].
    Stage,
}

impl Capability {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stage => "Multi-Axis Stage",
        }
    }
}

/// Trait objects produced by a [`DriverFactory`].
#[derive(Default)]
pub struct DeviceComponents {
    /// Registry grouping.
    pub category: Option<DeviceCategory>,
    /// The built stage, if any.
    pub stage: Option<Arc<dyn MultiAxisStage>>,
}

impl DeviceComponents {
    /// Empty components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities actually present.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.stage.iter().map(|_| Capability::Stage).collect()
    }

    /// Set the category.
    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Attach a stage.
    pub fn with_stage(mut self, stage: Arc<dyn MultiAxisStage>) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Builds devices of one driver family from configuration tables.
pub trait DriverFactory: Send + Sync + 'static {
    /// Value of the `type` key this factory handles, e.g. `"smaract_mcs2"`.
    fn driver_type(&self) -> &'static str;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Capabilities of every device this factory builds.
    fn capabilities(&self) -> &'static [Capability];

    /// Check a configuration table. Must not touch hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Build a device. Whether it is connected afterwards is up to the
    /// factory's own configuration keys.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}
