//! One physical MCS2 positioner channel.
//!
//! Every getter queries the controller. The values kept in the channel are
//! last-known readings for diagnostics only and are never used in place of a
//! hardware read.

use crate::ctl::{ChannelState, CtlResultExt, DeviceHandle, McsControl, MoveMode, Property};
use crate::units::{to_native, to_si};
use daq_core::error::{StageError, StageResult};
use daq_core::stage::Axis;
use parking_lot::Mutex;
use std::sync::Arc;

/// Positioner type names with a linear position sensor.
pub const LINEAR_SENSORS: &[&str] = &[
    "SL...S1SS",
    "SL...S1ME",
    "SL...S1SC1",
    "SL...T1SS",
    "SL...D1SS",
    "SL...D1SC2",
    "SL...D1SC1",
    "SL...D1ME",
    "CT002/AT002",
];

/// Whether `sensor` is in [`LINEAR_SENSORS`]. Case-sensitive.
pub fn is_linear_sensor(sensor: &str) -> bool {
    LINEAR_SENSORS.contains(&sensor)
}

/// Last-known values of a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSnapshot {
    /// Channel index on the controller
    pub index: u32,
    /// Axis name
    pub name: String,
    /// Last `CHANNEL_STATE` read
    pub status: Option<i32>,
    /// Last positioner type read
    pub sensor_type: Option<String>,
    /// Last position read (um)
    pub position_um: Option<f64>,
    /// Last speed read or set (um/s)
    pub speed_umps: Option<f64>,
    /// Last acceleration read or set (um/s^2)
    pub acceleration_umps2: Option<f64>,
    /// Current move mode
    pub move_mode: Option<MoveMode>,
}

/// One positioner channel on an open session.
pub struct Channel {
    control: Arc<dyn McsControl>,
    handle: DeviceHandle,
    index: u32,
    axis: Axis,
    cache: Mutex<ChannelSnapshot>,
}

impl Channel {
    /// Channel `index` on `handle`, driving `axis`. Does not touch hardware.
    pub fn new(control: Arc<dyn McsControl>, handle: DeviceHandle, index: u32, axis: Axis) -> Self {
        Self {
            control,
            handle,
            index,
            axis,
            cache: Mutex::new(ChannelSnapshot {
                index,
                name: axis.name().to_string(),
                move_mode: Some(MoveMode::RELATIVE),
                ..ChannelSnapshot::default()
            }),
        }
    }

    /// Channel index on the controller.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Logical axis.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Axis name (`X`, `Y`, `Z`).
    pub fn name(&self) -> &'static str {
        self.axis.name()
    }

    /// Raw `CHANNEL_STATE` bitmask.
    pub fn status(&self) -> StageResult<i32> {
        let code = self
            .control
            .get_property_i32(self.handle, self.index, Property::ChannelState)
            .with_operation("get channel state")?;
        self.cache.lock().status = Some(code);
        Ok(code)
    }

    /// Names of the status flags currently set. Never empty.
    pub fn humanized_status(&self) -> StageResult<Vec<String>> {
        Ok(ChannelState::humanize(self.status()?))
    }

    /// Whether the actively-moving flag is set.
    pub fn is_moving(&self) -> StageResult<bool> {
        Ok(ChannelState::from_code(self.status()?).contains(ChannelState::ACTIVELY_MOVING))
    }

    /// Positioner type name.
    pub fn sensor_type(&self) -> StageResult<String> {
        let sensor = self
            .control
            .get_property_string(self.handle, self.index, Property::PositionerTypeName)
            .with_operation("get positioner type")?;
        self.cache.lock().sensor_type = Some(sensor.clone());
        Ok(sensor)
    }

    /// Whether the positioner has a linear sensor.
    pub fn is_sensor_linear(&self) -> StageResult<bool> {
        Ok(is_linear_sensor(&self.sensor_type()?))
    }

    /// Position in um.
    pub fn position(&self) -> StageResult<f64> {
        let native = self
            .control
            .get_property_i64(self.handle, self.index, Property::Position)
            .with_operation("get position")?;
        let um = to_si(native);
        self.cache.lock().position_um = Some(um);
        Ok(um)
    }

    /// Move velocity in um/s.
    pub fn speed(&self) -> StageResult<f64> {
        let native = self
            .control
            .get_property_i64(self.handle, self.index, Property::MoveVelocity)
            .with_operation("get move velocity")?;
        let umps = to_si(native);
        self.cache.lock().speed_umps = Some(umps);
        Ok(umps)
    }

    /// Set the move velocity (um/s).
    pub fn set_speed(&self, umps: f64) -> StageResult<()> {
        self.control
            .set_property_i64(self.handle, self.index, Property::MoveVelocity, to_native(umps)?)
            .with_operation("set move velocity")?;
        self.cache.lock().speed_umps = Some(umps);
        Ok(())
    }

    /// Move acceleration in um/s^2.
    pub fn acceleration(&self) -> StageResult<f64> {
        let native = self
            .control
            .get_property_i64(self.handle, self.index, Property::MoveAcceleration)
            .with_operation("get move acceleration")?;
        let umps2 = to_si(native);
        self.cache.lock().acceleration_umps2 = Some(umps2);
        Ok(umps2)
    }

    /// Set the move acceleration (um/s^2).
    pub fn set_acceleration(&self, umps2: f64) -> StageResult<()> {
        self.control
            .set_property_i64(
                self.handle,
                self.index,
                Property::MoveAcceleration,
                to_native(umps2)?,
            )
            .with_operation("set move acceleration")?;
        self.cache.lock().acceleration_umps2 = Some(umps2);
        Ok(())
    }

    /// Mode of the last [`Channel::set_movement_mode`], closed-loop relative
    /// until one succeeds. Does not query the controller.
    pub fn movement_mode(&self) -> MoveMode {
        self.cache.lock().move_mode.unwrap_or(MoveMode::RELATIVE)
    }

    /// Only [`MoveMode::RELATIVE`] and [`MoveMode::ABSOLUTE`] are accepted.
    pub fn set_movement_mode(&self, mode: MoveMode) -> StageResult<()> {
        if !mode.is_closed_loop() {
            return Err(StageError::InvalidArgument(format!(
                "Invalid movement mode {mode:?}, expected closed-loop relative or absolute"
            )));
        }

        self.control
            .set_property_i32(self.handle, self.index, Property::MoveMode, mode.code())
            .with_operation("set move mode")?;
        self.cache.lock().move_mode = Some(mode);
        Ok(())
    }

    /// Start a move of `value_um`. Returns once the controller accepted the
    /// command, not when the move is done.
    pub fn move_to(&self, value_um: f64, mode: MoveMode) -> StageResult<()> {
        let native = to_native(value_um)?;
        self.set_movement_mode(mode)?;

        tracing::debug!(
            channel = self.index,
            axis = %self.axis,
            ?mode,
            native,
            "Issuing move"
        );
        self.control
            .move_channel(self.handle, self.index, native)
            .with_operation("move")
    }

    /// Halt this channel.
    pub fn stop(&self) -> StageResult<()> {
        self.control
            .stop(self.handle, self.index)
            .with_operation("stop")
    }

    /// Reference marks are not supported for MCS2 positioners.
    pub fn find_reference_mark(&self) -> StageResult<()> {
        Err(StageError::not_supported(
            "find_reference_mark",
            format!("MCS2 channel {}", self.index),
        ))
    }

    /// Copy of the last-known values.
    pub fn snapshot(&self) -> ChannelSnapshot {
        self.cache.lock().clone()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("axis", &self.axis)
            .field("handle", &self.handle)
            .finish()
    }
}
