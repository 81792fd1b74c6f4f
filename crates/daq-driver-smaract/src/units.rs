//! Conversion between MCS2 native units and micrometer-based SI values.
//!
//! The controller works in picometers (pm, pm/s, pm/s^2). The stage API works
//! in micrometers. No clamping happens here; values the controller cannot
//! reach are rejected by the controller itself.

use daq_core::error::{StageError, StageResult};

/// Native units per micrometer.
pub const NATIVE_PER_UM: f64 = 1e6;

/// Micrometers (or um/s, um/s^2) to native fixed-point units.
///
/// NaN, infinities and values that do not fit an `i64` after scaling are
/// `InvalidArgument`.
pub fn to_native(um: f64) -> StageResult<i64> {
    let native = (um * NATIVE_PER_UM).round();
    // i64::MAX is not representable; 2^63 is the first value out of range
    if !native.is_finite() || native < i64::MIN as f64 || native >= i64::MAX as f64 {
        return Err(StageError::InvalidArgument(format!(
            "{um} um is not representable in native units"
        )));
    }
    Ok(native as i64)
}

/// Native fixed-point units to micrometers.
///
/// Division keeps integral micrometer values exact, which multiplying by
/// `1e-6` does not.
pub fn to_si(native: i64) -> f64 {
    native as f64 / NATIVE_PER_UM
}
