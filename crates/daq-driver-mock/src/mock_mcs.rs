//! Simulated SmarAct MCS2 control library.
//!
//! [`MockMcsController`] implements [`McsControl`] in-process. It models a set
//! of controllers (single- or dual-module), their sessions and positioner
//! channels, and records every call so tests can assert on hardware traffic.
//!
//! # Motion model
//!
//! A move sets a target and marks the channel as actively moving.
//!
//! - `Instant`/`Chaos`: the channel reports `ACTIVELY_MOVING` for the next
//!   `settle_polls` channel-state reads, then arrives at the target. With
//!   zero settle polls the first read already sees it stopped.
//! - `Realistic`: the move takes `|distance| / velocity` of wall-clock time
//!   and the position is interpolated in between. Zero velocity arrives
//!   immediately.
//!
//! [`MockMcsController::hold_motion`] keeps a channel moving until it is
//! stopped, which is how settle timeouts are simulated.
//!
//! # Example
//!
//! ```rust,ignore
//! let mock = Arc::new(
//!     MockMcsController::builder()
//!         .device(MockDevice::dual_module("usb:sn:MCS2-1"))
//!         .settle_polls(2)
//!         .build(),
//! );
//! let driver = McsDriver::loaded(mock.clone());
//! ```

use crate::common::{ErrorConfig, MockMode};
use crate::config::SimulatorConfig;
use daq_driver_smaract::ctl::{ChannelState, CtlError, CtlResult, DeviceHandle, McsControl, MoveMode, Property};
use daq_driver_smaract::units::to_si;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// No device with the requested locator.
pub const ERR_DEVICE_NOT_FOUND: u32 = 0x0001;
/// Handle does not refer to an open session.
pub const ERR_INVALID_HANDLE: u32 = 0x0002;
/// Channel index out of range.
pub const ERR_INVALID_CHANNEL: u32 = 0x0003;
/// Property not readable/writable with the requested type.
pub const ERR_INVALID_PROPERTY: u32 = 0x0004;
/// Value outside the accepted range.
pub const ERR_RANGE: u32 = 0x0005;
/// Move issued in a mode the simulator does not model.
pub const ERR_INVALID_MOVE_MODE: u32 = 0x0006;

/// Default positioner type of simulated channels (linear sensor).
pub const DEFAULT_SENSOR: &str = "SL...S1SS";

/// Fastest accepted move velocity, pm/s (100 mm/s).
pub const MAX_VELOCITY: i64 = 100_000_000_000;

const CHANNELS_PER_MODULE: usize = 3;

/// One simulated control-library call.
#[allow(missing_docs)] // fields are the `McsControl` arguments
#[derive(Debug, Clone, PartialEq)]
pub enum CtlCall {
    /// `find_devices`
    FindDevices,
    /// `open`
    Open { locator: String },
    /// `close`
    Close { handle: DeviceHandle },
    /// `get_property_*`
    GetProperty { handle: DeviceHandle, channel: u32, property: Property },
    /// `set_property_*`, values widened to `i64`
    SetProperty { handle: DeviceHandle, channel: u32, property: Property, value: i64 },
    /// `move_channel`
    Move { handle: DeviceHandle, channel: u32, value: i64 },
    /// `stop`
    Stop { handle: DeviceHandle, channel: u32 },
}

impl CtlCall {
    /// Operation name, as used by [`ErrorConfig`] and [`MockMcsController::call_count`].
    pub fn operation(&self) -> &'static str {
        match self {
            Self::FindDevices => "find_devices",
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::GetProperty { .. } => "get_property",
            Self::SetProperty { .. } => "set_property",
            Self::Move { .. } => "move",
            Self::Stop { .. } => "stop",
        }
    }
}

/// A simulated controller.
#[derive(Debug, Clone)]
pub struct MockDevice {
    locator: String,
    modules: i32,
    channels: Vec<MockChannel>,
}

impl MockDevice {
    /// Controller with one bus module (3 channels).
    pub fn single_module(locator: impl Into<String>) -> Self {
        Self::with_modules(locator, 1)
    }

    /// Controller with two bus modules (6 channels).
    pub fn dual_module(locator: impl Into<String>) -> Self {
        Self::with_modules(locator, 2)
    }

    /// Controller with `modules` bus modules of three channels each.
    pub fn with_modules(locator: impl Into<String>, modules: i32) -> Self {
        let count = usize::try_from(modules).unwrap_or(0) * CHANNELS_PER_MODULE;
        Self {
            locator: locator.into(),
            modules,
            channels: vec![MockChannel::default(); count],
        }
    }

    /// Override the positioner type of one channel.
    pub fn with_sensor(mut self, channel: u32, sensor: impl Into<String>) -> Self {
        if let Some(ch) = self.channels.get_mut(channel as usize) {
            ch.sensor = sensor.into();
        }
        self
    }

    /// Start a channel at a position (um). Unrepresentable positions are ignored.
    pub fn with_position(mut self, channel: u32, um: f64) -> Self {
        if let (Some(ch), Ok(native)) = (
            self.channels.get_mut(channel as usize),
            daq_driver_smaract::units::to_native(um),
        ) {
            ch.position = native;
            ch.target = native;
        }
        self
    }

    /// Locator reported by discovery.
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

#[derive(Debug, Clone)]
struct MockChannel {
    sensor: String,
    position: i64,
    target: i64,
    velocity: i64,
    acceleration: i64,
    move_mode: i32,
    motion: Option<Motion>,
    held: bool,
    status_override: Option<i32>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self {
            sensor: DEFAULT_SENSOR.to_string(),
            position: 0,
            target: 0,
            velocity: 0,
            acceleration: 0,
            move_mode: MoveMode::ABSOLUTE.code(),
            motion: None,
            held: false,
            status_override: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    start_position: i64,
    started: Instant,
    duration: Duration,
    polls_left: u32,
}

impl MockChannel {
    /// Advance the motion model. `poll` is true for channel-state reads.
    fn update(&mut self, mode: MockMode, poll: bool) {
        let Some(motion) = self.motion else {
            return;
        };
        if self.held {
            return;
        }

        match mode {
            MockMode::Realistic => {
                let elapsed = motion.started.elapsed();
                if elapsed >= motion.duration {
                    self.arrive();
                } else {
                    let fraction = elapsed.as_secs_f64() / motion.duration.as_secs_f64();
                    let travelled = (self.target - motion.start_position) as f64 * fraction;
                    self.position = motion.start_position + travelled.round() as i64;
                }
            }
            MockMode::Instant | MockMode::Chaos => {
                if !poll {
                    return;
                }
                if motion.polls_left == 0 {
                    self.arrive();
                } else {
                    self.motion = Some(Motion {
                        polls_left: motion.polls_left - 1,
                        ..motion
                    });
                }
            }
        }
    }

    fn arrive(&mut self) {
        self.position = self.target;
        self.motion = None;
    }

    fn halt(&mut self) {
        self.target = self.position;
        self.motion = None;
        self.held = false;
    }

    fn state_code(&self) -> i32 {
        if let Some(code) = self.status_override {
            return code;
        }
        let mut state = ChannelState::SENSOR_PRESENT | ChannelState::IS_CALIBRATED;
        if self.motion.is_some() {
            state |= ChannelState::ACTIVELY_MOVING | ChannelState::CLOSED_LOOP_ACTIVE;
        }
        state.bits() as i32
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    devices: BTreeMap<String, MockDevice>,
    sessions: HashMap<DeviceHandle, String>,
    next_handle: DeviceHandle,
    fixed_handle: Option<DeviceHandle>,
    null_handles: Vec<String>,
}

impl ControllerState {
    fn device_mut(&mut self, handle: DeviceHandle) -> CtlResult<&mut MockDevice> {
        let locator = self
            .sessions
            .get(&handle)
            .ok_or_else(|| CtlError::new(ERR_INVALID_HANDLE, format!("Invalid handle {handle}")))?;
        self.devices
            .get_mut(locator)
            .ok_or_else(|| CtlError::new(ERR_DEVICE_NOT_FOUND, format!("Device '{locator}' vanished")))
    }

    fn channel_mut(&mut self, handle: DeviceHandle, channel: u32) -> CtlResult<&mut MockChannel> {
        self.device_mut(handle)?
            .channels
            .get_mut(channel as usize)
            .ok_or_else(|| CtlError::new(ERR_INVALID_CHANNEL, format!("Invalid channel {channel}")))
    }
}

/// Simulated MCS2 control library with call recording.
#[derive(Debug)]
pub struct MockMcsController {
    state: Mutex<ControllerState>,
    calls: Mutex<Vec<CtlCall>>,
    mode: MockMode,
    settle_polls: u32,
    errors: ErrorConfig,
}

/// Builder for [`MockMcsController`].
#[derive(Debug, Default)]
pub struct MockMcsControllerBuilder {
    devices: Vec<MockDevice>,
    mode: MockMode,
    settle_polls: u32,
    errors: Option<ErrorConfig>,
    chaos_rate: Option<f64>,
    fixed_handle: Option<DeviceHandle>,
    null_handles: Vec<String>,
}

impl MockMcsControllerBuilder {
    /// Add a controller.
    pub fn device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Set the timing model.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Channel-state reads that still report motion after a move (Instant/Chaos).
    pub fn settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    /// Inject errors.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Failure rate used in Chaos mode when no error config is given (default 0.1).
    pub fn chaos_rate(mut self, rate: f64) -> Self {
        self.chaos_rate = Some(rate);
        self
    }

    /// Make every `open` return the same handle.
    pub fn fixed_handle(mut self, handle: DeviceHandle) -> Self {
        self.fixed_handle = Some(handle);
        self
    }

    /// Make `open` on `locator` succeed without returning a handle.
    pub fn null_handle(mut self, locator: impl Into<String>) -> Self {
        self.null_handles.push(locator.into());
        self
    }

    /// Finish the controller.
    pub fn build(self) -> MockMcsController {
        let errors = match (self.errors, self.mode) {
            (Some(errors), _) => errors,
            (None, MockMode::Chaos) => ErrorConfig::random_failures(self.chaos_rate.unwrap_or(0.1)),
            (None, _) => ErrorConfig::none(),
        };

        let devices = self
            .devices
            .into_iter()
            .map(|d| (d.locator.clone(), d))
            .collect();

        MockMcsController {
            state: Mutex::new(ControllerState {
                devices,
                sessions: HashMap::new(),
                next_handle: 1,
                fixed_handle: self.fixed_handle,
                null_handles: self.null_handles,
            }),
            calls: Mutex::new(Vec::new()),
            mode: self.mode,
            settle_polls: self.settle_polls,
            errors,
        }
    }
}

impl MockMcsController {
    /// Start building a controller.
    pub fn builder() -> MockMcsControllerBuilder {
        MockMcsControllerBuilder::default()
    }

    /// Controller built from the `[simulator]` configuration section.
    pub fn from_config(config: &SimulatorConfig) -> Self {
        let mut builder = Self::builder()
            .mode(config.mode)
            .settle_polls(config.settle_polls);
        if config.failure_rate > 0.0 {
            builder = builder.error_config(ErrorConfig::random_failures_seeded(
                config.failure_rate,
                config.seed,
            ));
        }
        for device in &config.devices {
            builder = builder.device(device.to_mock_device());
        }
        builder.build()
    }

    /// Timing model in use.
    pub fn mode(&self) -> MockMode {
        self.mode
    }

    // =========================================================================
    // Spy
    // =========================================================================

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<CtlCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls of one operation (see [`CtlCall::operation`]).
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Recorded moves as `(channel, native value)`.
    pub fn moves(&self) -> Vec<(u32, i64)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CtlCall::Move { channel, value, .. } => Some((*channel, *value)),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    // =========================================================================
    // Simulation control
    // =========================================================================

    /// Keep a channel moving until it receives a stop.
    pub fn hold_motion(&self, locator: &str, channel: u32) {
        self.with_channel(locator, channel, |ch| {
            ch.held = true;
            if ch.motion.is_none() {
                ch.motion = Some(Motion {
                    start_position: ch.position,
                    started: Instant::now(),
                    duration: Duration::ZERO,
                    polls_left: 0,
                });
            }
        });
    }

    /// Force the raw channel-state code reported for a channel (`None` restores the model).
    pub fn set_status_override(&self, locator: &str, channel: u32, code: Option<i32>) {
        self.with_channel(locator, channel, |ch| ch.status_override = code);
    }

    /// Swap the positioner reported by a channel.
    pub fn set_sensor(&self, locator: &str, channel: u32, sensor: &str) {
        self.with_channel(locator, channel, |ch| ch.sensor = sensor.to_string());
    }

    /// Current simulated position in um.
    pub fn channel_position(&self, locator: &str, channel: u32) -> Option<f64> {
        self.with_channel(locator, channel, |ch| to_si(ch.position))
    }

    /// Current move velocity in um/s.
    pub fn channel_velocity(&self, locator: &str, channel: u32) -> Option<f64> {
        self.with_channel(locator, channel, |ch| to_si(ch.velocity))
    }

    /// Set a channel's move velocity directly (um/s), bypassing the call log.
    pub fn set_channel_velocity(&self, locator: &str, channel: u32, umps: f64) {
        if let Ok(native) = daq_driver_smaract::units::to_native(umps) {
            self.with_channel(locator, channel, |ch| ch.velocity = native);
        }
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether `handle` belongs to an open session.
    pub fn is_session_open(&self, handle: DeviceHandle) -> bool {
        self.state.lock().sessions.contains_key(&handle)
    }

    fn with_channel<T>(&self, locator: &str, channel: u32, f: impl FnOnce(&mut MockChannel) -> T) -> Option<T> {
        self.state
            .lock()
            .devices
            .get_mut(locator)
            .and_then(|d| d.channels.get_mut(channel as usize))
            .map(f)
    }

    fn record(&self, call: CtlCall) -> CtlResult<()> {
        let operation = call.operation();
        self.calls.lock().push(call);
        self.errors.check_operation(operation)
    }
}

impl McsControl for MockMcsController {
    fn find_devices(&self) -> CtlResult<String> {
        self.record(CtlCall::FindDevices)?;
        let state = self.state.lock();
        Ok(state.devices.keys().cloned().collect::<Vec<_>>().join("\n"))
    }

    fn open(&self, locator: &str) -> CtlResult<Option<DeviceHandle>> {
        self.record(CtlCall::Open {
            locator: locator.to_string(),
        })?;
        let mut state = self.state.lock();

        if !state.devices.contains_key(locator) {
            return Err(CtlError::new(
                ERR_DEVICE_NOT_FOUND,
                format!("No device at '{locator}'"),
            ));
        }
        if state.null_handles.iter().any(|l| l == locator) {
            return Ok(None);
        }

        let handle = match state.fixed_handle {
            Some(handle) => handle,
            None => {
                let handle = state.next_handle;
                state.next_handle += 1;
                handle
            }
        };
        state.sessions.insert(handle, locator.to_string());
        tracing::debug!(locator, handle, "Simulated MCS2 session opened");
        Ok(Some(handle))
    }

    fn close(&self, handle: DeviceHandle) -> CtlResult<()> {
        self.record(CtlCall::Close { handle })?;
        match self.state.lock().sessions.remove(&handle) {
            Some(locator) => {
                tracing::debug!(%locator, handle, "Simulated MCS2 session closed");
                Ok(())
            }
            None => Err(CtlError::new(
                ERR_INVALID_HANDLE,
                format!("Invalid handle {handle}"),
            )),
        }
    }

    fn get_property_i32(&self, handle: DeviceHandle, channel: u32, property: Property) -> CtlResult<i32> {
        self.record(CtlCall::GetProperty {
            handle,
            channel,
            property,
        })?;
        let mut state = self.state.lock();

        match property {
            Property::NumberOfBusModules => Ok(state.device_mut(handle)?.modules),
            Property::ChannelState => {
                let ch = state.channel_mut(handle, channel)?;
                ch.update(self.mode, true);
                Ok(ch.state_code())
            }
            Property::MoveMode => Ok(state.channel_mut(handle, channel)?.move_mode),
            other => Err(invalid_property(other, "i32")),
        }
    }

    fn get_property_i64(&self, handle: DeviceHandle, channel: u32, property: Property) -> CtlResult<i64> {
        self.record(CtlCall::GetProperty {
            handle,
            channel,
            property,
        })?;
        let mut state = self.state.lock();
        let ch = state.channel_mut(handle, channel)?;

        match property {
            Property::Position => {
                ch.update(self.mode, false);
                Ok(ch.position)
            }
            Property::MoveVelocity => Ok(ch.velocity),
            Property::MoveAcceleration => Ok(ch.acceleration),
            other => Err(invalid_property(other, "i64")),
        }
    }

    fn get_property_string(
        &self,
        handle: DeviceHandle,
        channel: u32,
        property: Property,
    ) -> CtlResult<String> {
        self.record(CtlCall::GetProperty {
            handle,
            channel,
            property,
        })?;
        let mut state = self.state.lock();
        let ch = state.channel_mut(handle, channel)?;

        match property {
            Property::PositionerTypeName => Ok(ch.sensor.clone()),
            other => Err(invalid_property(other, "string")),
        }
    }

    fn set_property_i32(
        &self,
        handle: DeviceHandle,
        channel: u32,
        property: Property,
        value: i32,
    ) -> CtlResult<()> {
        self.record(CtlCall::SetProperty {
            handle,
            channel,
            property,
            value: i64::from(value),
        })?;
        let mut state = self.state.lock();
        let ch = state.channel_mut(handle, channel)?;

        match property {
            Property::MoveMode => {
                MoveMode::try_from(value)
                    .map_err(|_| CtlError::new(ERR_RANGE, format!("Invalid move mode {value}")))?;
                ch.move_mode = value;
                Ok(())
            }
            other => Err(invalid_property(other, "writable i32")),
        }
    }

    fn set_property_i64(
        &self,
        handle: DeviceHandle,
        channel: u32,
        property: Property,
        value: i64,
    ) -> CtlResult<()> {
        self.record(CtlCall::SetProperty {
            handle,
            channel,
            property,
            value,
        })?;
        let mut state = self.state.lock();
        let ch = state.channel_mut(handle, channel)?;

        match property {
            Property::MoveVelocity => {
                if !(0..=MAX_VELOCITY).contains(&value) {
                    return Err(CtlError::new(
                        ERR_RANGE,
                        format!("Velocity {value} pm/s out of range"),
                    ));
                }
                ch.velocity = value;
                Ok(())
            }
            Property::MoveAcceleration => {
                if value < 0 {
                    return Err(CtlError::new(
                        ERR_RANGE,
                        format!("Acceleration {value} pm/s^2 out of range"),
                    ));
                }
                ch.acceleration = value;
                Ok(())
            }
            other => Err(invalid_property(other, "writable i64")),
        }
    }

    fn move_channel(&self, handle: DeviceHandle, channel: u32, value: i64) -> CtlResult<()> {
        self.record(CtlCall::Move {
            handle,
            channel,
            value,
        })?;
        let mut state = self.state.lock();
        let ch = state.channel_mut(handle, channel)?;
        ch.update(self.mode, false);

        let target = match MoveMode::try_from(ch.move_mode) {
            Ok(MoveMode::ClosedLoopAbsolute) => value,
            Ok(MoveMode::ClosedLoopRelative) => ch.target.saturating_add(value),
            _ => {
                return Err(CtlError::new(
                    ERR_INVALID_MOVE_MODE,
                    format!("Move mode {} is not simulated", ch.move_mode),
                ));
            }
        };

        let distance = target.abs_diff(ch.position);
        let duration = if ch.velocity > 0 {
            Duration::from_secs_f64(distance as f64 / ch.velocity as f64)
        } else {
            Duration::ZERO
        };

        ch.target = target;
        ch.motion = Some(Motion {
            start_position: ch.position,
            started: Instant::now(),
            duration,
            polls_left: self.settle_polls,
        });
        Ok(())
    }

    fn stop(&self, handle: DeviceHandle, channel: u32) -> CtlResult<()> {
        self.record(CtlCall::Stop { handle, channel })?;
        let mut state = self.state.lock();
        let ch = state.channel_mut(handle, channel)?;
        ch.update(self.mode, false);
        ch.halt();
        Ok(())
    }
}

fn invalid_property(property: Property, kind: &str) -> CtlError {
    CtlError::new(
        ERR_INVALID_PROPERTY,
        format!("Property {property} is not a {kind} property"),
    )
}
