//! Custom error types for motion-control drivers and the application.
//!
//! Two layers of errors live here:
//!
//! - **`StageError`**: the error taxonomy shared by every stage driver family.
//!   Each variant maps to one distinct failure class of the stage lifecycle
//!   (driver missing, bad address, not connected, sensor validation, ...), so
//!   callers can branch on the variant instead of parsing messages.
//! - **`DaqError`**: the application-level error, wrapping `StageError` together
//!   with configuration and I/O failures.
//!
//! ## Propagation Policy
//!
//! Nothing in the stage layer retries. Validation errors (`InvalidAddress`,
//! `InvalidArgument`) are raised immediately. Connection errors roll back the
//! stage before they are returned, so a failed `connect()` always leaves the
//! stage disconnected and safe to retry. `FatalProtocol` must reach the caller
//! unmodified.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the stage error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Boxed source error carried by [`StageError::Hardware`].
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by stage drivers.
///
/// # Error Categories
///
/// 1. **Gate errors** - `DriverUnavailable`, `NotConnected`
///    - Raised before any hardware access is attempted
///    - Recovery: load the vendor library / call `connect()` first
///
/// 2. **Validation errors** - `InvalidAddress`, `InvalidArgument`
///    - Permanent, never retried
///
/// 3. **Connection errors** - `HardwareIncompatible`, `Connection`, `FatalProtocol`
///    - The stage is rolled back to disconnected before the error is returned
///    - `FatalProtocol` signals a broken shared-session assumption and is not recoverable
///
/// 4. **Runtime errors** - `Hardware`, `SettleTimeout`, `NotSupported`
#[derive(Error, Debug)]
pub enum StageError {
    /// The vendor capability layer is not available (library missing or failed to load).
    #[error("Driver '{driver}' is not available: {reason}")]
    DriverUnavailable {
        /// Driver name
        driver: String,
        /// Why it is missing
        reason: String,
    },

    /// Stage address is malformed (e.g. lacks a channel-group suffix).
    #[error("Invalid stage address '{address}': {reason}")]
    InvalidAddress {
        /// Address as given
        address: String,
        /// What is wrong with it
        reason: String,
    },

    /// A hardware-touching operation was invoked while the stage is disconnected.
    #[error("Stage {stage} is not connected")]
    NotConnected {
        /// Stage identifier
        stage: String,
    },

    /// Sensor validation failed during connect.
    #[error("Channel {channel} of stage {stage} has no supported linear sensor (found '{sensor}')")]
    HardwareIncompatible {
        /// Stage identifier
        stage: String,
        /// Axis name of the failing channel
        channel: String,
        /// Positioner type reported
        sensor: String,
    },

    /// The shared-session protocol between logical stages was violated.
    #[error("Fatal protocol error: {0}")]
    FatalProtocol(String),

    /// An argument was outside the accepted set of values.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The hardware family does not implement this operation.
    #[error("Operation '{operation}' is not supported by {stage}")]
    NotSupported {
        /// Operation name
        operation: String,
        /// Stage or channel identifier
        stage: String,
    },

    /// A session could not be established or borrowed.
    #[error("Failed to connect stage {stage}: {reason}")]
    Connection {
        /// Stage identifier
        stage: String,
        /// Why the session is unavailable
        reason: String,
    },

    /// Motion did not settle within the configured bound.
    #[error("Stage {stage} did not settle within {timeout:?}")]
    SettleTimeout {
        /// Stage identifier
        stage: String,
        /// Bound that was exceeded
        timeout: Duration,
    },

    /// A call into the vendor capability layer failed.
    #[error("Hardware call '{operation}' failed: {source}")]
    Hardware {
        /// Library call that failed
        operation: String,
        /// Library error
        #[source]
        source: BoxedSource,
    },
}

impl StageError {
    /// Build a [`StageError::NotConnected`] for the given stage identifier.
    pub fn not_connected(stage: impl Into<String>) -> Self {
        Self::NotConnected {
            stage: stage.into(),
        }
    }

    /// Build a [`StageError::NotSupported`] for the given operation.
    pub fn not_supported(operation: impl Into<String>, stage: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
            stage: stage.into(),
        }
    }

    /// Build a [`StageError::Hardware`] wrapping a capability-layer error.
    pub fn hardware(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Hardware {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// True for errors that are raised before any hardware interaction.
    pub fn is_gate_error(&self) -> bool {
        matches!(
            self,
            Self::DriverUnavailable { .. } | Self::NotConnected { .. } | Self::InvalidAddress { .. }
        )
    }
}

/// Primary error type for the application.
///
/// Consolidates stage driver failures with configuration and I/O problems so
/// the binary can report them uniformly.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration values parsed but failed semantic validation.
    ///
    /// **Recovery Strategy**: Abort startup, display validation error message.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage driver reported an error.
    #[error(transparent)]
    Stage(#[from] StageError),
}
