//! MCS2 control library interface.
//!
//! The vendor library is an opaque capability provider: it opens and closes
//! device sessions, reads and writes channel properties, and starts or stops
//! moves. This module describes that surface as the [`McsControl`] trait so
//! the stage logic can run against the real binding or the simulator in
//! `daq-driver-mock`.
//!
//! Property identifiers and channel-state bits are symbolic here. Mapping them
//! to the numeric ids of a particular library release is the binding's job.

use bitflags::bitflags;
use daq_core::error::{StageError, StageResult};
use std::fmt;
use thiserror::Error;

/// Session id returned by [`McsControl::open`].
pub type DeviceHandle = u32;

/// Result type alias for control library calls.
pub type CtlResult<T> = std::result::Result<T, CtlError>;

/// Error reported by the control library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("MCS2 error 0x{code:04X}: {message}")]
pub struct CtlError {
    /// Library error code
    pub code: u32,
    /// Library error text
    pub message: String,
}

impl CtlError {
    /// Error with a code and message.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Attach the failing operation to a control library error.
pub trait CtlResultExt<T> {
    /// Map into [`StageError::Hardware`] naming `operation`.
    fn with_operation(self, operation: impl Into<String>) -> StageResult<T>;
}

impl<T> CtlResultExt<T> for CtlResult<T> {
    fn with_operation(self, operation: impl Into<String>) -> StageResult<T> {
        self.map_err(|e| StageError::hardware(operation, e))
    }
}

/// Device and channel properties used by the stage driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Number of bus modules attached to a controller (device level, channel 0).
    NumberOfBusModules,
    /// Channel state bitmask, see [`ChannelState`].
    ChannelState,
    /// Positioner type name, e.g. `"SL...S1SS"`.
    PositionerTypeName,
    /// Position in picometers.
    Position,
    /// Move mode, see [`MoveMode`].
    MoveMode,
    /// Move velocity in pm/s.
    MoveVelocity,
    /// Move acceleration in pm/s^2.
    MoveAcceleration,
}

impl Property {
    /// Vendor constant name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NumberOfBusModules => "NUMBER_OF_BUS_MODULES",
            Self::ChannelState => "CHANNEL_STATE",
            Self::PositionerTypeName => "POSITIONER_TYPE_NAME",
            Self::Position => "POSITION",
            Self::MoveMode => "MOVE_MODE",
            Self::MoveVelocity => "MOVE_VELOCITY",
            Self::MoveAcceleration => "MOVE_ACCELERATION",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Channel state bits reported by [`Property::ChannelState`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelState: u32 {
        const ACTIVELY_MOVING = 0x0000_0001;
        const CLOSED_LOOP_ACTIVE = 0x0000_0002;
        const CALIBRATING = 0x0000_0004;
        const REFERENCING = 0x0000_0008;
        const MOVE_DELAYED = 0x0000_0010;
        const SENSOR_PRESENT = 0x0000_0020;
        const IS_CALIBRATED = 0x0000_0040;
        const IS_REFERENCED = 0x0000_0080;
        const END_STOP_REACHED = 0x0000_0100;
        const RANGE_LIMIT_REACHED = 0x0000_0200;
        const FOLLOWING_LIMIT_REACHED = 0x0000_0400;
        const MOVEMENT_FAILED = 0x0000_0800;
        const IS_STREAMING = 0x0000_1000;
        const POSITIONER_OVERLOAD = 0x0000_2000;
        const OVER_TEMPERATURE = 0x0000_4000;
        const REFERENCE_MARK = 0x0000_8000;
        const IS_PHASED = 0x0001_0000;
        const POSITIONER_FAULT = 0x0002_0000;
        const AMPLIFIER_ENABLED = 0x0004_0000;
        const IN_POSITION = 0x0008_0000;
        const BRAKE_ENABLED = 0x0010_0000;
    }
}

impl ChannelState {
    /// Interpret a raw `CHANNEL_STATE` value. Unknown bits are kept.
    pub fn from_code(code: i32) -> Self {
        Self::from_bits_retain(code as u32)
    }

    /// Names of all known flags set in `code`, in bit order.
    ///
    /// Never empty: a code without any known flag yields a single
    /// `"Unknown status code: <code>"` entry.
    pub fn humanize(code: i32) -> Vec<String> {
        let names: Vec<String> = Self::from_code(code)
            .iter_names()
            .map(|(name, _)| name.to_string())
            .collect();

        if names.is_empty() {
            vec![format!("Unknown status code: {code}")]
        } else {
            names
        }
    }
}

/// Movement modes understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MoveMode {
    /// Closed-loop move to an absolute position
    ClosedLoopAbsolute = 0,
    /// Closed-loop move by a distance
    ClosedLoopRelative = 1,
    /// Scanner to an absolute value
    ScanAbsolute = 2,
    /// Scanner by a relative value
    ScanRelative = 3,
    /// Open-loop steps
    Step = 4,
}

impl MoveMode {
    /// Absolute closed-loop positioning.
    pub const ABSOLUTE: MoveMode = MoveMode::ClosedLoopAbsolute;
    /// Relative closed-loop positioning.
    pub const RELATIVE: MoveMode = MoveMode::ClosedLoopRelative;

    /// Closed-loop modes are the only ones with micrometer semantics.
    pub fn is_closed_loop(&self) -> bool {
        matches!(self, Self::ClosedLoopAbsolute | Self::ClosedLoopRelative)
    }

    /// Raw value of the `MOVE_MODE` property.
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl TryFrom<i32> for MoveMode {
    type Error = StageError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::ClosedLoopAbsolute),
            1 => Ok(Self::ClosedLoopRelative),
            2 => Ok(Self::ScanAbsolute),
            3 => Ok(Self::ScanRelative),
            4 => Ok(Self::Step),
            other => Err(StageError::InvalidArgument(format!(
                "Invalid movement mode {other}"
            ))),
        }
    }
}

/// Blocking interface of the MCS2 control library.
///
/// Every call is a short round-trip to the controller. Implementations must
/// be usable from several stages at once (`Send + Sync`); the library itself
/// serializes access to a session.
pub trait McsControl: Send + Sync {
    /// Newline-delimited list of device locators.
    fn find_devices(&self) -> CtlResult<String>;

    /// Open a session. `Ok(None)` means the library returned no handle.
    fn open(&self, locator: &str) -> CtlResult<Option<DeviceHandle>>;

    /// Close a session.
    fn close(&self, handle: DeviceHandle) -> CtlResult<()>;

    /// Read an `i32` property.
    fn get_property_i32(&self, handle: DeviceHandle, channel: u32, property: Property) -> CtlResult<i32>;

    /// Read an `i64` property.
    fn get_property_i64(&self, handle: DeviceHandle, channel: u32, property: Property) -> CtlResult<i64>;

    /// Read a string property.
    fn get_property_string(
        &self,
        handle: DeviceHandle,
        channel: u32,
        property: Property,
    ) -> CtlResult<String>;

    /// Write an `i32` property.
    fn set_property_i32(
        &self,
        handle: DeviceHandle,
        channel: u32,
        property: Property,
        value: i32,
    ) -> CtlResult<()>;

    /// Write an `i64` property.
    fn set_property_i64(
        &self,
        handle: DeviceHandle,
        channel: u32,
        property: Property,
        value: i64,
    ) -> CtlResult<()>;

    /// Start a move of `value` native units, interpreted per the channel's move mode.
    fn move_channel(&self, handle: DeviceHandle, channel: u32, value: i64) -> CtlResult<()>;

    /// Halt one channel immediately.
    fn stop(&self, handle: DeviceHandle, channel: u32) -> CtlResult<()>;
}
