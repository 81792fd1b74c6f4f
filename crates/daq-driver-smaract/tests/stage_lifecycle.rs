//! Mcs2Stage lifecycle tests against the simulated MCS2 library.
//!
//! | Area | What is checked |
//! |------|-----------------|
//! | Gates | driver gate before connection gate, no hardware traffic on failure |
//! | Connect | defaults applied, sensor validation rollback, retry after failure |
//! | Sharing | owner/borrower session discipline on dual-module controllers |
//! | Motion | axis order, skipped axes, settle polling, timeout, stop |

use daq_core::error::StageError;
use daq_core::stage::MotionConfig;
use daq_driver_mock::{ErrorConfig, ErrorScenario, MockDevice, MockMcsController};
use daq_driver_smaract::{ChannelState, Mcs2Stage, McsDriver, MultiAxisStage, Ownership};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

const LOC: &str = "usb:sn:MCS2-00001234";
const PRIMARY: &str = "usb:sn:MCS2-00001234_Ch1-3";
const SECONDARY: &str = "usb:sn:MCS2-00001234_Ch4-6";

fn simulator(device: MockDevice) -> (Arc<MockMcsController>, McsDriver) {
    let mock = Arc::new(MockMcsController::builder().device(device).build());
    let driver = McsDriver::loaded(mock.clone());
    (mock, driver)
}

fn dual() -> (Arc<MockMcsController>, McsDriver) {
    simulator(MockDevice::dual_module(LOC))
}

fn stage(driver: &McsDriver, address: &str) -> Mcs2Stage {
    Mcs2Stage::new(driver.clone(), address)
        .unwrap()
        .with_motion_config(MotionConfig::immediate())
}

// =============================================================================
// Gates
// =============================================================================

#[test]
fn invalid_address_fails_before_any_hardware_call() {
    let (mock, driver) = dual();

    for address in [LOC, "usb:sn:MCS2-00001234_Ch7-9", "_Ch1-3"] {
        let err = Mcs2Stage::new(driver.clone(), address).unwrap_err();
        assert!(matches!(err, StageError::InvalidAddress { .. }), "{address}");
    }
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn unavailable_driver_is_reported_before_connection_state() {
    let driver = McsDriver::unavailable("libsmaractctl not found");
    let stage = stage(&driver, PRIMARY);

    assert!(matches!(
        stage.connect().await,
        Err(StageError::DriverUnavailable { .. })
    ));
    assert!(matches!(
        stage.position().await,
        Err(StageError::DriverUnavailable { .. })
    ));
    assert!(matches!(
        stage.disconnect().await,
        Err(StageError::DriverUnavailable { .. })
    ));
}

#[tokio::test]
async fn operations_require_connection() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);

    assert!(matches!(
        stage.position().await,
        Err(StageError::NotConnected { .. })
    ));
    assert!(matches!(
        stage.move_relative(1.0, 0.0, 0.0, false).await,
        Err(StageError::NotConnected { .. })
    ));
    assert!(matches!(
        stage.speed_xy().await,
        Err(StageError::NotConnected { .. })
    ));
    assert!(matches!(
        stage.disconnect().await,
        Err(StageError::NotConnected { .. })
    ));
    assert!(mock.calls().is_empty());
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn connect_applies_default_actuation_parameters() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);

    assert!(stage.connect().await.unwrap());
    assert!(stage.is_connected());

    assert_eq!(stage.speed_xy().await.unwrap(), 300.0);
    assert_eq!(stage.speed_z().await.unwrap(), 20.0);
    assert_eq!(stage.acceleration_xy().await.unwrap(), 0.0);
    assert_eq!(mock.channel_velocity(LOC, 0), Some(300.0));
    assert_eq!(mock.channel_velocity(LOC, 2), Some(20.0));
    // secondary channels untouched
    assert_eq!(mock.channel_velocity(LOC, 3), Some(0.0));
}

#[tokio::test]
async fn connect_is_idempotent() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);

    stage.connect().await.unwrap();
    stage.connect().await.unwrap();
    assert_eq!(mock.call_count("open"), 1);
}

#[tokio::test]
async fn non_linear_sensor_on_any_axis_rolls_back() {
    for (channel, axis) in [(0, "X"), (1, "Y"), (2, "Z")] {
        let (mock, driver) = simulator(MockDevice::dual_module(LOC).with_sensor(channel, "SR...S1SS"));
        let stage = stage(&driver, PRIMARY);

        match stage.connect().await {
            Err(StageError::HardwareIncompatible {
                stage: name,
                channel: failed,
                sensor,
            }) => {
                assert_eq!(name, PRIMARY);
                assert_eq!(failed, axis);
                assert_eq!(sensor, "SR...S1SS");
            }
            other => panic!("expected HardwareIncompatible, got {other:?}"),
        }

        assert!(!stage.is_connected());
        assert!(matches!(
            stage.channel_snapshots(),
            Err(StageError::NotConnected { .. })
        ));
        assert_eq!(mock.open_sessions(), 0, "owner must close its session");
        assert!(driver.sessions().is_empty());
        // defaults are only applied after validation
        assert_eq!(mock.call_count("set_property"), 0);
    }
}

#[tokio::test]
async fn failed_connect_is_retry_safe() {
    let (mock, driver) = simulator(MockDevice::dual_module(LOC).with_sensor(1, "SR...S1SS"));
    let stage = stage(&driver, PRIMARY);

    assert!(stage.connect().await.is_err());
    assert_eq!(mock.call_count("close"), 1);

    mock.set_sensor(LOC, 1, "SL...D1SS");
    stage.connect().await.unwrap();
    assert!(stage.is_connected());
    assert_eq!(mock.open_sessions(), 1);
}

#[tokio::test]
async fn missing_handle_is_a_connection_error() {
    let mock = Arc::new(
        MockMcsController::builder()
            .device(MockDevice::dual_module(LOC))
            .null_handle(LOC)
            .build(),
    );
    let driver = McsDriver::loaded(mock.clone());
    let stage = stage(&driver, PRIMARY);

    assert!(matches!(
        stage.connect().await,
        Err(StageError::Connection { .. })
    ));
    assert!(!stage.is_connected());
}

#[tokio::test]
async fn hardware_errors_carry_the_operation() {
    let mock = Arc::new(
        MockMcsController::builder()
            .device(MockDevice::dual_module(LOC))
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout { operation: "move" }))
            .build(),
    );
    let driver = McsDriver::loaded(mock.clone());
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();

    let err = stage.move_relative(1.0, 0.0, 0.0, false).await.unwrap_err();
    assert!(matches!(err, StageError::Hardware { ref operation, .. } if operation == "move"));
    // still connected; nothing retried
    assert!(stage.is_connected());
    assert_eq!(mock.call_count("move"), 1);
}

// =============================================================================
// Shared sessions
// =============================================================================

#[tokio::test]
async fn secondary_stage_borrows_and_never_closes() {
    let (mock, driver) = dual();
    let primary = stage(&driver, PRIMARY);
    let secondary = stage(&driver, SECONDARY);
    assert_eq!(secondary.ownership(), Ownership::Borrower);

    primary.connect().await.unwrap();
    secondary.connect().await.unwrap();
    assert_eq!(mock.call_count("open"), 1);

    mock.clear_calls();
    secondary.disconnect().await.unwrap();
    assert_eq!(mock.call_count("close"), 0);
    assert!(!secondary.is_connected());

    // owner keeps working on the shared session
    primary.position().await.unwrap();
    primary.disconnect().await.unwrap();
    assert_eq!(mock.call_count("close"), 1);
    assert_eq!(mock.open_sessions(), 0);
}

#[tokio::test]
async fn secondary_stage_drives_channels_four_to_six() {
    let (mock, driver) = dual();
    let primary = stage(&driver, PRIMARY);
    let secondary = stage(&driver, SECONDARY);
    primary.connect().await.unwrap();
    secondary.connect().await.unwrap();

    mock.clear_calls();
    secondary
        .move_relative(1.0, 2.0, 3.0, true)
        .await
        .unwrap();
    assert_eq!(
        mock.moves(),
        vec![(3, 1_000_000), (4, 2_000_000), (5, 3_000_000)]
    );
    assert_eq!(mock.channel_position(LOC, 0), Some(0.0));
}

#[tokio::test]
async fn borrower_rollback_keeps_owner_session() {
    let (mock, driver) = simulator(MockDevice::dual_module(LOC).with_sensor(4, "SR...S1SS"));
    let primary = stage(&driver, PRIMARY);
    let secondary = stage(&driver, SECONDARY);
    primary.connect().await.unwrap();
    mock.clear_calls();

    match secondary.connect().await {
        Err(StageError::HardwareIncompatible { channel, .. }) => assert_eq!(channel, "Y"),
        other => panic!("expected HardwareIncompatible, got {other:?}"),
    }
    assert!(!secondary.is_connected());
    assert_eq!(mock.call_count("close"), 0);
    assert_eq!(mock.open_sessions(), 1);
    assert!(driver.sessions().is_open(LOC));

    primary.move_relative(1.0, 0.0, 0.0, true).await.unwrap();
    assert_eq!(primary.position().await.unwrap().x, 1.0);
}

#[tokio::test]
async fn borrower_without_owner_cannot_connect() {
    let (mock, driver) = dual();
    let secondary = stage(&driver, SECONDARY);

    assert!(matches!(
        secondary.connect().await,
        Err(StageError::Connection { .. })
    ));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn borrower_is_disconnected_when_owner_closes() {
    let (_mock, driver) = dual();
    let primary = stage(&driver, PRIMARY);
    let secondary = stage(&driver, SECONDARY);
    primary.connect().await.unwrap();
    secondary.connect().await.unwrap();

    primary.disconnect().await.unwrap();
    assert!(!secondary.is_connected());
    assert!(matches!(
        secondary.position().await,
        Err(StageError::NotConnected { .. })
    ));

    // reconnecting both restores the pair
    primary.connect().await.unwrap();
    secondary.connect().await.unwrap();
    secondary.position().await.unwrap();
}

#[tokio::test]
async fn second_owner_on_one_controller_is_fatal() {
    let (mock, driver) = dual();
    let first = stage(&driver, PRIMARY);
    let second = stage(&driver, PRIMARY);

    first.connect().await.unwrap();
    assert!(matches!(
        second.connect().await,
        Err(StageError::FatalProtocol(_))
    ));
    assert_eq!(mock.call_count("open"), 1);
    assert!(first.is_connected());
}

#[tokio::test]
async fn colliding_handles_are_fatal() {
    let mock = Arc::new(
        MockMcsController::builder()
            .device(MockDevice::dual_module("LOC-A"))
            .device(MockDevice::dual_module("LOC-B"))
            .fixed_handle(1)
            .build(),
    );
    let driver = McsDriver::loaded(mock.clone());
    let a = stage(&driver, "LOC-A_Ch1-3");
    let b = stage(&driver, "LOC-B_Ch1-3");

    a.connect().await.unwrap();
    assert!(matches!(b.connect().await, Err(StageError::FatalProtocol(_))));
    assert!(a.is_connected());
    assert!(!b.is_connected());
}

#[tokio::test]
async fn dropping_a_connected_owner_closes_its_session() {
    let (mock, driver) = dual();
    {
        let stage = stage(&driver, PRIMARY);
        stage.connect().await.unwrap();
        assert_eq!(mock.open_sessions(), 1);
    }
    assert_eq!(mock.open_sessions(), 0);
    assert!(driver.sessions().is_empty());
}

// =============================================================================
// Motion
// =============================================================================

#[tokio::test]
async fn move_absolute_skips_unspecified_axes() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();
    mock.clear_calls();

    stage
        .move_absolute(Some(5.0), None, None, false)
        .await
        .unwrap();
    assert_eq!(mock.moves(), vec![(0, 5_000_000)]);
    assert_eq!(mock.call_count("move"), 1);
}

#[tokio::test]
async fn unrepresentable_targets_move_nothing() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();
    mock.clear_calls();

    let err = stage
        .move_absolute(Some(f64::NAN), None, Some(1e20), false)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::InvalidArgument(_)));

    // a bad Z must not let X start
    let err = stage
        .move_relative(1.0, 0.0, f64::INFINITY, false)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::InvalidArgument(_)));

    assert!(mock.calls().is_empty());
    assert_eq!(stage.position().await.unwrap().to_array(), [0.0, 0.0, 0.0]);
}

#[tokio::test]
async fn move_relative_waits_for_every_axis() {
    let mock = Arc::new(
        MockMcsController::builder()
            .device(MockDevice::dual_module(LOC).with_position(2, 10.0))
            .settle_polls(3)
            .build(),
    );
    let driver = McsDriver::loaded(mock.clone());
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();
    mock.clear_calls();

    stage.move_relative(1.5, -2.0, 0.25, true).await.unwrap();

    let channels: Vec<u32> = mock.moves().iter().map(|(ch, _)| *ch).collect();
    assert_eq!(channels, vec![0, 1, 2]);
    assert!(stage.is_stopped().await.unwrap());

    let position = stage.position().await.unwrap();
    assert_eq!(position.to_array(), [1.5, -2.0, 10.25]);
}

#[tokio::test]
async fn is_stopped_checks_every_axis() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();
    assert!(stage.is_stopped().await.unwrap());

    let moving = ChannelState::ACTIVELY_MOVING.bits() as i32;
    for channel in 0..3 {
        mock.set_status_override(LOC, channel, Some(moving));
        assert!(!stage.is_stopped().await.unwrap(), "channel {channel}");
        mock.set_status_override(LOC, channel, None);
    }
    assert!(stage.is_stopped().await.unwrap());
}

#[tokio::test]
async fn status_is_humanized_per_axis() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();

    mock.set_status_override(LOC, 1, Some(0));
    let status = stage.status().await.unwrap();

    assert_eq!(status.len(), 3);
    assert!(status[0].contains(&"SENSOR_PRESENT".to_string()));
    assert_eq!(status[1], vec!["Unknown status code: 0".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn wait_gives_up_on_a_stuck_axis() {
    let (mock, driver) = dual();
    let stage = Mcs2Stage::new(driver.clone(), PRIMARY)
        .unwrap()
        .with_motion_config(
            MotionConfig::default().with_settle_timeout(Some(Duration::from_secs(2))),
        );
    stage.connect().await.unwrap();
    mock.hold_motion(LOC, 1);

    let err = stage.move_relative(1.0, 1.0, 0.0, true).await.unwrap_err();
    assert!(matches!(err, StageError::SettleTimeout { .. }));

    stage.stop().await.unwrap();
    assert!(stage.is_stopped().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn stop_from_another_task_ends_the_wait() {
    let (mock, driver) = dual();
    let stage = Arc::new(
        Mcs2Stage::new(driver.clone(), PRIMARY)
            .unwrap()
            .with_motion_config(MotionConfig::default()),
    );
    stage.connect().await.unwrap();
    stage.move_relative(10.0, 0.0, 0.0, false).await.unwrap();
    mock.hold_motion(LOC, 0);

    let stopper = {
        let stage = Arc::clone(&stage);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            stage.stop().await
        })
    };

    stage.wait_settled().await.unwrap();
    stopper.await.unwrap().unwrap();
    assert_eq!(mock.call_count("stop"), 3);
}

#[tokio::test]
async fn speed_and_acceleration_setters_round_trip() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();

    stage.set_speed_xy(125.5).await.unwrap();
    stage.set_speed_z(7.0).await.unwrap();
    stage.set_acceleration_xy(1000.0).await.unwrap();

    assert_eq!(stage.speed_xy().await.unwrap(), 125.5);
    assert_eq!(stage.speed_z().await.unwrap(), 7.0);
    assert_eq!(stage.acceleration_xy().await.unwrap(), 1000.0);
    assert_eq!(mock.channel_velocity(LOC, 1), Some(125.5));
}

#[tokio::test]
async fn out_of_range_speed_is_reported_by_the_controller() {
    let (_mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();

    let err = stage.set_speed_z(-1.0).await.unwrap_err();
    assert!(matches!(err, StageError::Hardware { .. }));
}

#[tokio::test]
async fn non_finite_speed_is_rejected_before_the_controller() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();
    mock.clear_calls();

    assert!(matches!(
        stage.set_speed_xy(f64::NAN).await,
        Err(StageError::InvalidArgument(_))
    ));
    assert!(matches!(
        stage.set_acceleration_xy(f64::NEG_INFINITY).await,
        Err(StageError::InvalidArgument(_))
    ));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
#[traced_test]
async fn xy_speed_mismatch_is_logged_and_x_wins() {
    let (mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();

    mock.set_channel_velocity(LOC, 1, 100.0);
    assert_eq!(stage.speed_xy().await.unwrap(), 300.0);
    assert!(logs_contain("Speed of X and Y differ"));
}

#[tokio::test]
async fn reference_marks_are_not_supported() {
    let (_mock, driver) = dual();
    let stage = stage(&driver, PRIMARY);
    stage.connect().await.unwrap();

    assert!(matches!(
        stage.find_reference_mark().await,
        Err(StageError::NotSupported { .. })
    ));
}

#[tokio::test]
async fn identity_and_snapshots() {
    let (_mock, driver) = dual();
    let secondary = stage(&driver, SECONDARY);
    assert_eq!(secondary.identifier(), SECONDARY);
    assert_eq!(
        secondary.to_string(),
        "SmarAct Piezo-Stage at usb:sn:MCS2-00001234_Ch4-6"
    );

    let primary = stage(&driver, PRIMARY);
    primary.connect().await.unwrap();
    primary.position().await.unwrap();

    let snapshots = primary.channel_snapshots().unwrap();
    let names: Vec<&str> = snapshots.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["X", "Y", "Z"]);
    assert_eq!(snapshots[0].speed_umps, Some(300.0));
    assert_eq!(snapshots[2].position_um, Some(0.0));
    assert_eq!(snapshots[1].sensor_type.as_deref(), Some("SL...S1SS"));
}
