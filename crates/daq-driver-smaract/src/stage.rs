//! SmarAct MCS2 3-axis piezo stage.
//!
//! An [`Mcs2Stage`] is one logical 3-axis stage, i.e. channels 1-3 or 4-6 of a
//! controller. Construction only parses the address; all hardware access
//! happens in [`MultiAxisStage::connect`] and later.
//!
//! # Connect sequence
//!
//! 1. Driver gate (`DriverUnavailable`)
//! 2. Open the session (`_Ch1-3`) or borrow it from the registry (`_Ch4-6`)
//! 3. Build the X, Y and Z channels
//! 4. Require a linear sensor on every channel (`HardwareIncompatible`)
//! 5. Apply default speeds and acceleration
//!
//! Any failure in 3-5 releases the session again, so the stage stays
//! disconnected and `connect()` can simply be retried.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stage = Mcs2Stage::new(driver.clone(), "usb:sn:MCS2-00001234_Ch1-3")?;
//! stage.connect().await?;
//! stage.move_relative(10.0, 0.0, 0.0, true).await?;
//! println!("{}", stage.position().await?);
//! stage.disconnect().await?;
//! ```

use crate::address::StageAddress;
use crate::channel::{Channel, ChannelSnapshot};
use crate::ctl::{CtlResultExt, McsControl, MoveMode};
use crate::driver::McsDriver;
use crate::session::{Ownership, SessionLease};
use crate::units;
use async_trait::async_trait;
use daq_core::capabilities::MultiAxisStage;
use daq_core::error::{StageError, StageResult};
use daq_core::stage::{wait_until, Axis, MotionConfig, StageLink, StagePosition};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// XY move velocity applied on connect (um/s).
pub const DEFAULT_SPEED_XY_UMPS: f64 = 300.0;
/// Z move velocity applied on connect (um/s).
pub const DEFAULT_SPEED_Z_UMPS: f64 = 20.0;
/// XY move acceleration applied on connect (um/s^2). Zero disables the ramp.
pub const DEFAULT_ACCELERATION_XY_UMPS2: f64 = 0.0;

/// Live connection of a stage: its session lease and the three channels.
struct Mcs2Connection {
    lease: SessionLease,
    channels: [Channel; 3],
}

impl Mcs2Connection {
    fn channel(&self, axis: Axis) -> &Channel {
        match axis {
            Axis::X => &self.channels[0],
            Axis::Y => &self.channels[1],
            Axis::Z => &self.channels[2],
        }
    }
}

/// Logical 3-axis stage on a SmarAct MCS2 controller.
pub struct Mcs2Stage {
    driver: McsDriver,
    address: StageAddress,
    motion: MotionConfig,
    link: StageLink<Mcs2Connection>,
}

impl Mcs2Stage {
    /// Create a disconnected stage.
    ///
    /// Fails with [`StageError::InvalidAddress`] when `address` does not end
    /// in `_Ch1-3` or `_Ch4-6`. Never touches hardware.
    pub fn new(driver: McsDriver, address: &str) -> StageResult<Self> {
        let address = StageAddress::parse(address)?;
        Ok(Self {
            driver,
            address,
            motion: MotionConfig::default(),
            link: StageLink::new(),
        })
    }

    /// Replace the poll interval and settle bound.
    pub fn with_motion_config(mut self, motion: MotionConfig) -> Self {
        self.motion = motion;
        self
    }

    /// Parsed address.
    pub fn address(&self) -> &StageAddress {
        &self.address
    }

    /// Poll interval and settle bound in use.
    pub fn motion_config(&self) -> &MotionConfig {
        &self.motion
    }

    /// Owner for `_Ch1-3`, borrower for `_Ch4-6`.
    pub fn ownership(&self) -> Ownership {
        self.address.ownership()
    }

    /// Last-known channel values in X, Y, Z order.
    pub fn channel_snapshots(&self) -> StageResult<Vec<ChannelSnapshot>> {
        let conn = self.connection()?;
        Ok(conn.channels.iter().map(Channel::snapshot).collect())
    }

    /// Driver gate, then connection gate.
    fn connection(&self) -> StageResult<Arc<Mcs2Connection>> {
        self.driver.control()?;
        let conn = self.link.current(self.address.as_str())?;
        conn.lease.live_handle(self.address.as_str())?;
        Ok(conn)
    }

    fn establish(&self, control: &Arc<dyn McsControl>) -> StageResult<Mcs2Connection> {
        let stage = self.address.as_str();
        let locator = self.address.locator();
        let sessions = self.driver.sessions();

        let lease = match self.ownership() {
            Ownership::Owner => {
                sessions.ensure_unowned(locator)?;
                let handle = control
                    .open(locator)
                    .with_operation("open")?
                    .ok_or_else(|| StageError::Connection {
                        stage: stage.to_string(),
                        reason: format!("library returned no handle for '{locator}'"),
                    })?;
                // A colliding handle belongs to a live session and must not be closed here.
                sessions.register_owner(locator, handle)?
            }
            Ownership::Borrower => sessions.borrow(stage, locator)?,
        };

        match self.initialize(control, &lease) {
            Ok(channels) => Ok(Mcs2Connection { lease, channels }),
            Err(err) => {
                tracing::warn!(stage, error = %err, "Connect failed, rolling back");
                if let Err(close_err) = self.release(control, lease) {
                    tracing::warn!(stage, error = %close_err, "Failed to close session during rollback");
                }
                Err(err)
            }
        }
    }

    fn initialize(
        &self,
        control: &Arc<dyn McsControl>,
        lease: &SessionLease,
    ) -> StageResult<[Channel; 3]> {
        let mapping = self.address.mapping();
        let make = |axis: Axis| {
            Channel::new(
                Arc::clone(control),
                lease.handle(),
                mapping.channel(axis),
                axis,
            )
        };
        let channels = [make(Axis::X), make(Axis::Y), make(Axis::Z)];

        for channel in &channels {
            let sensor = channel.sensor_type()?;
            if !crate::channel::is_linear_sensor(&sensor) {
                return Err(StageError::HardwareIncompatible {
                    stage: self.address.to_string(),
                    channel: channel.name().to_string(),
                    sensor,
                });
            }
        }

        let [x, y, z] = &channels;
        x.set_speed(DEFAULT_SPEED_XY_UMPS)?;
        y.set_speed(DEFAULT_SPEED_XY_UMPS)?;
        z.set_speed(DEFAULT_SPEED_Z_UMPS)?;
        x.set_acceleration(DEFAULT_ACCELERATION_XY_UMPS2)?;
        y.set_acceleration(DEFAULT_ACCELERATION_XY_UMPS2)?;

        Ok(channels)
    }

    /// Give a lease back. Owners close the library session.
    fn release(&self, control: &Arc<dyn McsControl>, lease: SessionLease) -> StageResult<()> {
        let handle = lease.handle();
        if self.driver.sessions().release(lease) {
            tracing::debug!(stage = %self.address, handle, "Closing session");
            control.close(handle).with_operation("close")?;
        }
        Ok(())
    }

    fn disconnect_now(&self) -> StageResult<()> {
        let control = self.driver.control()?;
        self.link
            .disconnect_with(self.address.as_str(), |conn| self.release(control, conn.lease.clone()))
    }

    fn check_stopped(&self) -> StageResult<bool> {
        let conn = self.connection()?;
        for channel in &conn.channels {
            if channel.is_moving()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Read an XY quantity from X and Y, preferring X when they disagree.
    fn read_xy(&self, quantity: &str, read: impl Fn(&Channel) -> StageResult<f64>) -> StageResult<f64> {
        let conn = self.connection()?;
        let x = read(conn.channel(Axis::X))?;
        let y = read(conn.channel(Axis::Y))?;
        if x != y {
            tracing::info!(
                stage = %self.address,
                x,
                y,
                "{quantity} of X and Y differ, using X"
            );
        }
        Ok(x)
    }

    fn move_axes(&self, targets: [Option<f64>; 3], mode: MoveMode) -> StageResult<()> {
        let conn = self.connection()?;
        // no axis moves if any target is unrepresentable
        for value in targets.iter().flatten() {
            units::to_native(*value)?;
        }
        for (axis, target) in Axis::ALL.into_iter().zip(targets) {
            if let Some(value) = target {
                conn.channel(axis).move_to(value, mode)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MultiAxisStage for Mcs2Stage {
    fn identifier(&self) -> &str {
        self.address.as_str()
    }

    fn is_connected(&self) -> bool {
        self.link
            .current(self.address.as_str())
            .is_ok_and(|conn| conn.lease.session().is_open())
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn connect(&self) -> StageResult<bool> {
        let control = self.driver.control()?;

        // A borrower whose owner went away holds a dead lease; drop it and reconnect.
        if self.link.is_connected() && !self.is_connected() {
            tracing::debug!("Discarding stale session lease");
            self.link.disconnect_with(self.address.as_str(), |_| Ok(()))?;
        }

        if self.link.connect_with(|| self.establish(control))? {
            tracing::info!(ownership = ?self.ownership(), "SmarAct MCS2 stage connected");
        }
        Ok(true)
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn disconnect(&self) -> StageResult<()> {
        self.disconnect_now()?;
        tracing::info!("SmarAct MCS2 stage disconnected");
        Ok(())
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn position(&self) -> StageResult<StagePosition> {
        let conn = self.connection()?;
        Ok(StagePosition::new(
            conn.channel(Axis::X).position()?,
            conn.channel(Axis::Y).position()?,
            conn.channel(Axis::Z).position()?,
        ))
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn move_relative(&self, dx: f64, dy: f64, dz: f64, wait: bool) -> StageResult<()> {
        self.move_axes([Some(dx), Some(dy), Some(dz)], MoveMode::RELATIVE)?;
        if wait {
            self.wait_settled().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn move_absolute(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        wait: bool,
    ) -> StageResult<()> {
        self.move_axes([x, y, z], MoveMode::ABSOLUTE)?;
        if wait {
            self.wait_settled().await?;
        }
        Ok(())
    }

    async fn status(&self) -> StageResult<Vec<Vec<String>>> {
        let conn = self.connection()?;
        conn.channels
            .iter()
            .map(Channel::humanized_status)
            .collect()
    }

    async fn is_stopped(&self) -> StageResult<bool> {
        self.check_stopped()
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn wait_settled(&self) -> StageResult<()> {
        wait_until(self.address.as_str(), &self.motion, || self.check_stopped()).await
    }

    /// Every channel gets a stop command even if an earlier one fails; the
    /// first error is returned.
    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn stop(&self) -> StageResult<()> {
        let conn = self.connection()?;
        let mut first_err = None;
        for channel in &conn.channels {
            if let Err(err) = channel.stop() {
                tracing::warn!(axis = %channel.axis(), error = %err, "Stop failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn set_speed_xy(&self, umps: f64) -> StageResult<()> {
        let conn = self.connection()?;
        conn.channel(Axis::X).set_speed(umps)?;
        conn.channel(Axis::Y).set_speed(umps)
    }

    async fn speed_xy(&self) -> StageResult<f64> {
        self.read_xy("Speed", Channel::speed)
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn set_speed_z(&self, umps: f64) -> StageResult<()> {
        self.connection()?.channel(Axis::Z).set_speed(umps)
    }

    async fn speed_z(&self) -> StageResult<f64> {
        self.connection()?.channel(Axis::Z).speed()
    }

    #[instrument(skip(self), fields(stage = %self.address), err)]
    async fn set_acceleration_xy(&self, umps2: f64) -> StageResult<()> {
        let conn = self.connection()?;
        conn.channel(Axis::X).set_acceleration(umps2)?;
        conn.channel(Axis::Y).set_acceleration(umps2)
    }

    async fn acceleration_xy(&self) -> StageResult<f64> {
        self.read_xy("Acceleration", Channel::acceleration)
    }

    async fn find_reference_mark(&self) -> StageResult<()> {
        let conn = self.connection()?;
        for channel in &conn.channels {
            channel.find_reference_mark()?;
        }
        Ok(())
    }
}

impl fmt::Display for Mcs2Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SmarAct Piezo-Stage at {}", self.address)
    }
}

impl fmt::Debug for Mcs2Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mcs2Stage")
            .field("address", &self.address.as_str())
            .field("ownership", &self.ownership())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for Mcs2Stage {
    fn drop(&mut self) {
        if !self.link.is_connected() {
            return;
        }
        if let Err(err) = self.disconnect_now() {
            tracing::warn!(stage = %self.address, error = %err, "Failed to release session on drop");
        }
    }
}
