//! Simulated hardware for photonic-daq.
//!
//! This crate provides an in-process stand-in for the SmarAct MCS2 control
//! library, so stages can be driven and tested without physical hardware.
//!
//! # Available Mocks
//!
//! - [`MockMcsController`] - implements [`daq_driver_smaract::McsControl`]:
//!   controllers with one or two bus modules, session handles, positioner
//!   channels with a simple motion model, and a call log (spy)
//!
//! # Modes
//!
//! - [`MockMode::Instant`]: moves settle after a configurable number of status polls
//! - [`MockMode::Realistic`]: moves take `distance / velocity` of wall-clock time
//! - [`MockMode::Chaos`]: random call failures via [`ErrorConfig`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_mock::{MockDevice, MockMcsController};
//! use daq_driver_smaract::{Mcs2Stage, McsDriver};
//!
//! let mock = Arc::new(
//!     MockMcsController::builder()
//!         .device(MockDevice::dual_module("usb:sn:MCS2-1"))
//!         .build(),
//! );
//! let driver = McsDriver::loaded(mock.clone());
//! let stage = Mcs2Stage::new(driver, "usb:sn:MCS2-1_Ch1-3")?;
//! stage.connect().await?;
//! assert_eq!(mock.call_count("open"), 1);
//! ```

pub mod common;
pub mod config;
mod mock_mcs;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario, MockMode};
pub use config::{SimulatedDevice, SimulatorConfig};
pub use mock_mcs::{
    CtlCall, MockDevice, MockMcsController, MockMcsControllerBuilder, DEFAULT_SENSOR,
    ERR_DEVICE_NOT_FOUND, ERR_INVALID_CHANNEL, ERR_INVALID_HANDLE, ERR_INVALID_MOVE_MODE,
    ERR_INVALID_PROPERTY, ERR_RANGE,
};
