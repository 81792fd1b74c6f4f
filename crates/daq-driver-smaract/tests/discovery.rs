//! Stage discovery against simulated controllers.

use daq_core::error::StageError;
use daq_driver_mock::{ErrorConfig, ErrorScenario, MockDevice, MockMcsController};
use daq_driver_smaract::{find_stage_addresses, McsDriver};
use std::sync::Arc;
use tracing_test::traced_test;

fn driver_with(devices: Vec<MockDevice>) -> (Arc<MockMcsController>, McsDriver) {
    let builder = devices
        .into_iter()
        .fold(MockMcsController::builder(), |b, d| b.device(d));
    let mock = Arc::new(builder.build());
    let driver = McsDriver::loaded(mock.clone());
    (mock, driver)
}

#[test]
fn dual_module_controllers_yield_two_sorted_addresses() {
    let (mock, driver) = driver_with(vec![
        MockDevice::dual_module("usb:sn:MCS2-B"),
        MockDevice::dual_module("usb:sn:MCS2-A"),
    ]);

    let addresses = find_stage_addresses(&driver).unwrap();
    assert_eq!(
        addresses,
        vec![
            "usb:sn:MCS2-A_Ch1-3",
            "usb:sn:MCS2-A_Ch4-6",
            "usb:sn:MCS2-B_Ch1-3",
            "usb:sn:MCS2-B_Ch4-6",
        ]
    );
    // probe sessions are short-lived
    assert_eq!(mock.call_count("open"), 2);
    assert_eq!(mock.call_count("close"), 2);
    assert_eq!(mock.open_sessions(), 0);
}

#[test]
#[traced_test]
fn single_module_controllers_are_skipped_with_a_warning() {
    let (_mock, driver) = driver_with(vec![
        MockDevice::single_module("usb:sn:MCS2-SINGLE"),
        MockDevice::dual_module("usb:sn:MCS2-DUAL"),
    ]);

    let addresses = find_stage_addresses(&driver).unwrap();
    assert_eq!(
        addresses,
        vec!["usb:sn:MCS2-DUAL_Ch1-3", "usb:sn:MCS2-DUAL_Ch4-6"]
    );
    assert!(logs_contain("not a dual-module device"));
}

#[test]
fn no_controllers_means_no_addresses() {
    let (mock, driver) = driver_with(Vec::new());

    assert!(find_stage_addresses(&driver).unwrap().is_empty());
    assert_eq!(mock.call_count("open"), 0);
}

#[test]
fn unavailable_driver_is_reported() {
    let driver = McsDriver::unavailable("library not installed");
    assert!(matches!(
        find_stage_addresses(&driver),
        Err(StageError::DriverUnavailable { .. })
    ));
}

#[test]
fn probe_session_is_closed_when_the_module_query_fails() {
    let mock = Arc::new(
        MockMcsController::builder()
            .device(MockDevice::dual_module("usb:sn:MCS2-A"))
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: "get_property",
            }))
            .build(),
    );
    let driver = McsDriver::loaded(mock.clone());

    let err = find_stage_addresses(&driver).unwrap_err();
    assert!(matches!(err, StageError::Hardware { .. }));
    assert_eq!(mock.call_count("close"), 1);
    assert_eq!(mock.open_sessions(), 0);
}
