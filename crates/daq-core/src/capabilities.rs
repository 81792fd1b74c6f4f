//! Hardware Capabilities
//!
//! Capability traits implemented by stage driver families. Orchestration code
//! (measurement routines, scripts, the CLI) talks to `dyn MultiAxisStage` and
//! never to a vendor type, so one vendor can be swapped for another without
//! touching callers.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses the shared [`StageError`](crate::error::StageError) taxonomy
//! - Takes `&self`; drivers use interior mutability for connection state
//!
//! # Example
//!
//! ```rust,ignore
//! async fn raster_line<S: MultiAxisStage + ?Sized>(stage: &S, step_um: f64, n: usize) -> StageResult<()> {
//!     stage.connect().await?;
//!     for _ in 0..n {
//!         stage.move_relative(step_um, 0.0, 0.0, true).await?;
//!     }
//!     stage.disconnect().await
//! }
//! ```

use crate::error::{StageError, StageResult};
use crate::stage::StagePosition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Device category for registry listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    /// Motion stages and actuators
    Stage,
    /// Anything else
    #[default]
    Other,
}

/// Capability: 3-axis positioning stage
///
/// # Contract
/// - All positions, speeds and accelerations are in micrometer-based SI units
///   (um, um/s, um/s^2)
/// - Every method except `identifier`/`is_connected` fails fast with
///   `DriverUnavailable` when the vendor layer is missing, then with
///   `NotConnected` when the stage is disconnected, before touching hardware
/// - Moves are issued X, then Y, then Z; with `wait = true` they return only
///   after the stage has settled
/// - `position` reads axes independently; no cross-axis atomicity
#[async_trait]
pub trait MultiAxisStage: Send + Sync {
    /// Stable identifier of this logical stage (its address).
    fn identifier(&self) -> &str;

    /// Whether the stage currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Open (or borrow) the hardware session, validate sensors and apply
    /// default actuation parameters.
    ///
    /// Returns `Ok(true)` when connected, including when it already was.
    async fn connect(&self) -> StageResult<bool>;

    /// Release the hardware session.
    async fn disconnect(&self) -> StageResult<()>;

    /// Current `[x, y, z]` position in um.
    async fn position(&self) -> StageResult<StagePosition>;

    /// Move by the given offsets in um.
    async fn move_relative(&self, dx: f64, dy: f64, dz: f64, wait: bool) -> StageResult<()>;

    /// Move to the given targets in um; `None` leaves that axis untouched.
    async fn move_absolute(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        wait: bool,
    ) -> StageResult<()>;

    /// Humanized status flags of the X, Y and Z channels.
    async fn status(&self) -> StageResult<Vec<Vec<String>>>;

    /// True when no axis reports active motion.
    async fn is_stopped(&self) -> StageResult<bool>;

    /// Poll until the stage has stopped (bounded by the driver's motion config).
    async fn wait_settled(&self) -> StageResult<()>;

    /// Halt all axes immediately.
    async fn stop(&self) -> StageResult<()>;

    /// Set the move velocity of X and Y (um/s).
    async fn set_speed_xy(&self, umps: f64) -> StageResult<()>;

    /// Move velocity of X (um/s). Logs when Y differs.
    async fn speed_xy(&self) -> StageResult<f64>;

    /// Set the move velocity of Z (um/s).
    async fn set_speed_z(&self, umps: f64) -> StageResult<()>;

    /// Move velocity of Z (um/s).
    async fn speed_z(&self) -> StageResult<f64>;

    /// Set the move acceleration of X and Y (um/s^2).
    async fn set_acceleration_xy(&self, umps2: f64) -> StageResult<()>;

    /// Move acceleration of X (um/s^2). Logs when Y differs.
    async fn acceleration_xy(&self) -> StageResult<f64>;

    /// Locate the reference (home) mark of every axis.
    ///
    /// # Default Implementation
    /// Returns [`StageError::NotSupported`].
    async fn find_reference_mark(&self) -> StageResult<()> {
        Err(StageError::not_supported(
            "find_reference_mark",
            self.identifier(),
        ))
    }
}
