//! Shared building blocks for multi-axis stage drivers.
//!
//! Every stage family follows the same lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connected --disconnect()--> Disconnected
//! ```
//!
//! `connect()` is atomic from the caller's point of view: the connection is
//! built completely off to the side and only published when every step
//! succeeded. [`StageLink`] implements that state machine once so drivers only
//! supply the vendor-specific "build a connection" and "tear it down" steps.
//!
//! Motion completion is detected by polling. [`wait_until`] is the bounded
//! poll loop used by every driver's `wait_settled()`.

use crate::error::{StageError, StageResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Logical axis role of a 3-axis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    /// First lateral axis
    X,
    /// Second lateral axis
    Y,
    /// Vertical axis
    Z,
}

impl Axis {
    /// All axes in the fixed command order (X, then Y, then Z).
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Axis name as used in log messages and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position of a 3-axis stage in micrometers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StagePosition {
    /// X in um
    pub x: f64,
    /// Y in um
    pub y: f64,
    /// Z in um
    pub z: f64,
}

impl StagePosition {
    /// Position from three coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Component for a logical axis.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// `[x, y, z]` array form.
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for StagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3}, {:.3}] um", self.x, self.y, self.z)
    }
}

/// Polling parameters for settle detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionConfig {
    /// Delay between two status checks.
    pub poll_interval: Duration,
    /// Upper bound on a single settle wait. `None` waits indefinitely.
    pub settle_timeout: Option<Duration>,
}

impl MotionConfig {
    /// Default delay between status polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
    /// Default settle bound.
    pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

    /// Zero-delay polling, for tests against simulated hardware.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            settle_timeout: Self::default().settle_timeout,
        }
    }

    /// Set the delay between settle polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the settle bound; `None` waits indefinitely.
    pub fn with_settle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settle_timeout = timeout;
        self
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            settle_timeout: Some(Self::DEFAULT_SETTLE_TIMEOUT),
        }
    }
}

/// Poll `condition` until it reports `true`, sleeping `config.poll_interval`
/// before every check.
///
/// Fails with [`StageError::SettleTimeout`] once `config.settle_timeout` has
/// elapsed, and propagates the first error returned by `condition`.
pub async fn wait_until<F>(stage: &str, config: &MotionConfig, mut condition: F) -> StageResult<()>
where
    F: FnMut() -> StageResult<bool>,
{
    let start = tokio::time::Instant::now();

    loop {
        tokio::time::sleep(config.poll_interval).await;

        if condition()? {
            tracing::debug!(stage, elapsed = ?start.elapsed(), "Motion settled");
            return Ok(());
        }

        if let Some(timeout) = config.settle_timeout {
            if start.elapsed() >= timeout {
                return Err(StageError::SettleTimeout {
                    stage: stage.to_string(),
                    timeout,
                });
            }
        }

        if config.poll_interval.is_zero() {
            tokio::task::yield_now().await;
        }
    }
}

/// Connection state holder implementing the stage lifecycle state machine.
///
/// `C` is the driver's live connection (session plus channels). It is only
/// ever stored after it was built completely, so observers see either no
/// connection or a fully initialized one.
pub struct StageLink<C> {
    state: RwLock<Option<Arc<C>>>,
}

impl<C> StageLink<C> {
    /// Disconnected holder.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Whether a connection is held.
    pub fn is_connected(&self) -> bool {
        self.state.read().is_some()
    }

    /// The live connection, or [`StageError::NotConnected`].
    pub fn current(&self, stage: &str) -> StageResult<Arc<C>> {
        self.state
            .read()
            .clone()
            .ok_or_else(|| StageError::not_connected(stage))
    }

    /// Run `establish` unless already connected.
    ///
    /// Returns `Ok(false)` if a connection already existed (no-op) and
    /// `Ok(true)` once a new connection was published. On error nothing is
    /// stored; `establish` is responsible for releasing whatever it acquired.
    pub fn connect_with<F>(&self, establish: F) -> StageResult<bool>
    where
        F: FnOnce() -> StageResult<C>,
    {
        let mut state = self.state.write();
        if state.is_some() {
            return Ok(false);
        }

        let connection = establish()?;
        *state = Some(Arc::new(connection));
        Ok(true)
    }

    /// Take the connection out and hand it to `release`.
    ///
    /// The stage is disconnected afterwards even if `release` fails.
    pub fn disconnect_with<F>(&self, stage: &str, release: F) -> StageResult<()>
    where
        F: FnOnce(Arc<C>) -> StageResult<()>,
    {
        let connection = self
            .state
            .write()
            .take()
            .ok_or_else(|| StageError::not_connected(stage))?;
        release(connection)
    }
}

impl<C> Default for StageLink<C> {
    fn default() -> Self {
        Self::new()
    }
}
