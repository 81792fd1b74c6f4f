//! Stage discovery.
//!
//! Enumerates MCS2 controllers and turns every dual-module controller into its
//! two logical stage addresses.

use crate::address::ChannelGroup;
use crate::ctl::{CtlResultExt, McsControl, Property};
use crate::driver::McsDriver;
use daq_core::error::{StageError, StageResult};
use std::sync::Arc;

/// Number of bus modules of a controller driving two 3-axis stages.
pub const DUAL_MODULE_COUNT: i32 = 2;

/// Logical stage addresses of all connected dual-module controllers, sorted.
///
/// Each locator is probed with a short-lived session to read its bus module
/// count. Controllers with any other module count are skipped with a warning.
pub fn find_stage_addresses(driver: &McsDriver) -> StageResult<Vec<String>> {
    let control = driver.control()?;
    let listing = control.find_devices().with_operation("find devices")?;

    let mut addresses = Vec::new();
    for locator in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let modules = probe_module_count(control, locator)?;
        if modules == DUAL_MODULE_COUNT {
            tracing::debug!(locator, "Found dual-module MCS2 controller");
            addresses.extend(ChannelGroup::ALL.iter().map(|g| g.address_for(locator)));
        } else {
            tracing::warn!(
                locator,
                modules,
                "Skipping MCS2 controller that is not a dual-module device"
            );
        }
    }

    addresses.sort();
    tracing::info!(count = addresses.len(), "MCS2 stage discovery finished");
    Ok(addresses)
}

fn probe_module_count(control: &Arc<dyn McsControl>, locator: &str) -> StageResult<i32> {
    let handle = control
        .open(locator)
        .with_operation("open probe session")?
        .ok_or_else(|| StageError::Connection {
            stage: locator.to_string(),
            reason: "library returned no handle for probe session".to_string(),
        })?;

    let modules = control
        .get_property_i32(handle, 0, Property::NumberOfBusModules)
        .with_operation("get number of bus modules");
    let closed = control.close(handle).with_operation("close probe session");

    let modules = modules?;
    closed?;
    Ok(modules)
}
