//! SmarAct MCS2 piezo stage driver.
//!
//! Exposes MCS2 controllers as [`MultiAxisStage`]s. A 6-channel dual-module
//! controller appears as two independent logical stages, `<locator>_Ch1-3`
//! and `<locator>_Ch4-6`, that share one library session.
//!
//! The vendor control library is consumed through the [`McsControl`] trait.
//! [`McsDriver`] wraps it (or records why it could not be loaded) and is
//! injected into every stage and into [`find_stage_addresses`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_smaract::{find_stage_addresses, Mcs2Stage, McsDriver, MultiAxisStage};
//!
//! let driver = McsDriver::loaded(control);
//! for address in find_stage_addresses(&driver)? {
//!     let stage = Mcs2Stage::new(driver.clone(), &address)?;
//!     stage.connect().await?;
//!     println!("{stage}: {}", stage.position().await?);
//! }
//! ```
//!
//! Or register the factory with the application:
//!
//! ```rust,ignore
//! factories.push(Box::new(Mcs2StageFactory::new(driver.clone())));
//! ```

pub mod address;
pub mod channel;
pub mod ctl;
pub mod discovery;
pub mod driver;
pub mod factory;
pub mod session;
pub mod stage;
pub mod units;

pub use address::{AxisMapping, ChannelGroup, StageAddress};
pub use channel::{Channel, ChannelSnapshot};
pub use ctl::{ChannelState, CtlError, CtlResult, DeviceHandle, McsControl, MoveMode, Property};
pub use daq_core::capabilities::MultiAxisStage;
pub use discovery::find_stage_addresses;
pub use driver::{McsDriver, DRIVER_NAME};
pub use factory::{Mcs2StageConfig, Mcs2StageFactory};
pub use session::{Ownership, SessionLease, SessionRegistry};
pub use stage::Mcs2Stage;
