//! # photonic-daq
//!
//! Application layer of the stage motion-control stack. The stage drivers
//! live in the workspace crates; this crate wires them together for the
//! `photonic-daq` binary.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based loading and validation of `photonic_daq.toml`
//!   plus `PHOTONIC_DAQ_` environment overrides. See [`config::AppConfig`].
//! - **`logging`**: `tracing-subscriber` setup (pretty, compact or JSON output).
//! - **`hardware`**: composition root. Picks the MCS2 capability provider,
//!   registers driver factories and opens stages by address.
//!
//! ## Workspace
//!
//! - `daq-core`: `MultiAxisStage`, `StageError`, `MotionConfig`, `DriverFactory`
//! - `daq-driver-smaract`: SmarAct MCS2 stages, discovery, session sharing
//! - `daq-driver-mock`: simulated MCS2 control library

pub mod config;
pub mod hardware;
pub mod logging;

pub use config::AppConfig;
pub use hardware::{Hardware, OpenStage};
