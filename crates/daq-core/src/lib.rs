//! `daq-core`
//!
//! Core trait definitions and types shared by the stage driver crates.
//!
//! ## Key Types
//!
//! - [`capabilities::MultiAxisStage`]: the vendor-independent 3-axis stage interface
//! - [`stage::StageLink`]: the connect/disconnect state machine every driver reuses
//! - [`stage::wait_until`]: bounded polling used for settle detection
//! - [`error::StageError`]: the error taxonomy shared by all stage families
//! - [`driver::DriverFactory`]: build devices from TOML configuration

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod stage;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use capabilities::MultiAxisStage;
pub use error::{DaqError, StageError, StageResult};
pub use stage::{Axis, MotionConfig, StageLink, StagePosition};
pub use thiserror::Error;
