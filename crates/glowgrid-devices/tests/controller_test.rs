//! Device controller behavior against a scripted driver: state projection,
//! the frozen field table, write semantics, and the reconnect supervisor.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use common::ScriptedDriver;
use glowgrid_devices::controller::{ConnectionStatus, DeviceController};
use glowgrid_devices::driver::{DeviceDriver, DriverError, DriverEvent};

const TEST_RETRY_DELAY: Duration = Duration::from_millis(10);

fn controller_for(driver: &Arc<ScriptedDriver>) -> DeviceController {
    let driver: Arc<dyn DeviceDriver> = driver.clone();
    DeviceController::with_retry_delay(driver, TEST_RETRY_DELAY)
}

async fn wait_for_status(
    controller: &DeviceController,
    wanted: ConnectionStatus,
) -> ConnectionStatus {
    for _ in 0..100 {
        let status = controller.status().await;
        if status == wanted {
            return status;
        }
        sleep(Duration::from_millis(10)).await;
    }
    controller.status().await
}

#[tokio::test]
async fn test_states_unknown_before_connect() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = controller_for(&driver);

    assert!(controller.states().await.is_none());
    assert_eq!(controller.status().await, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_connect_projects_states_in_native_order() {
    // Native ids deliberately inserted out of order; numeric ids sort
    // numerically, so "10" lands after "2".
    let driver = Arc::new(ScriptedDriver::new(&[
        ("2", json!(false)),
        ("10", json!("dimmed")),
        ("1", json!(true)),
    ]));
    let controller = controller_for(&driver);

    controller.connect().await.unwrap();

    assert_eq!(
        controller.states().await,
        Some(vec![json!(true), json!(false), json!("dimmed")])
    );
    assert_eq!(controller.field_count().await, Some(3));
    assert_eq!(controller.status().await, ConnectionStatus::Connected);
    assert!(controller.last_seen().await.is_some());
}

#[tokio::test]
async fn test_connect_failure_surfaces_display_message() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    driver.fail_connect.store(true, Ordering::SeqCst);
    let controller = controller_for(&driver);

    let error = controller.connect().await.unwrap_err();
    match error {
        DriverError::Connection(message) => assert!(message.contains("hardware fault 17")),
        other => panic!("expected Connection error, got {other:?}"),
    }
    assert!(controller.states().await.is_none());
}

#[tokio::test]
async fn test_failed_state_fetch_also_fails_connect() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    driver.fail_fetch.store(true, Ordering::SeqCst);
    let controller = controller_for(&driver);

    let error = controller.connect().await.unwrap_err();
    assert!(matches!(error, DriverError::Connection(_)));
    assert_eq!(driver.connect_count(), 1);
    assert!(controller.states().await.is_none());
}

#[tokio::test]
async fn test_disconnect_clears_states_immediately() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = controller_for(&driver);

    controller.connect().await.unwrap();
    assert!(controller.states().await.is_some());

    controller.disconnect().await;
    assert!(controller.states().await.is_none());
    assert_eq!(controller.status().await, ConnectionStatus::Disconnected);

    // The driver-level disconnect is detached; it should still land.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_set_state_writes_native_id_and_refreshes() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true)), ("2", json!(false))]));
    let controller = controller_for(&driver);

    controller.connect().await.unwrap();
    controller.set_state(1, json!(true)).await.unwrap();

    // Logical index 1 resolves to native id "2".
    assert_eq!(driver.recorded_writes(), vec![("2".to_string(), json!(true))]);
    assert_eq!(
        controller.states().await,
        Some(vec![json!(true), json!(true)])
    );
}

#[tokio::test]
async fn test_set_state_failure_leaves_snapshot() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true)), ("2", json!(false))]));
    let controller = controller_for(&driver);
    controller.connect().await.unwrap();

    driver.fail_write.store(true, Ordering::SeqCst);
    let error = controller.set_state(0, json!(false)).await.unwrap_err();

    // The driver's error passes through unmodified.
    match error {
        DriverError::Communication(message) => assert!(message.contains("write refused")),
        other => panic!("expected Communication error, got {other:?}"),
    }
    assert_eq!(
        controller.states().await,
        Some(vec![json!(true), json!(false)])
    );
}

#[tokio::test]
async fn test_set_state_requires_connection() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = controller_for(&driver);

    assert!(matches!(
        controller.set_state(0, json!(true)).await,
        Err(DriverError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnects_after_disconnect_event() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = controller_for(&driver);
    controller.connect().await.unwrap();
    assert_eq!(driver.connect_count(), 1);

    driver.emit(DriverEvent::Disconnected);

    let status = wait_for_status(&controller, ConnectionStatus::Connected).await;
    assert_eq!(status, ConnectionStatus::Connected);
    assert!(driver.connect_count() >= 2);
    assert!(controller.states().await.is_some());
}

#[tokio::test]
async fn test_reconnect_retries_until_device_returns() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = controller_for(&driver);
    controller.connect().await.unwrap();

    // Device drops and stays unreachable for a few retry rounds.
    driver.fail_connect.store(true, Ordering::SeqCst);
    driver.emit(DriverEvent::Disconnected);
    sleep(Duration::from_millis(100)).await;
    assert!(driver.connect_count() >= 2);
    assert_eq!(controller.status().await, ConnectionStatus::Disconnected);

    driver.fail_connect.store(false, Ordering::SeqCst);
    let status = wait_for_status(&controller, ConnectionStatus::Connected).await;
    assert_eq!(status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_field_table_frozen_across_reconnects() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true)), ("2", json!(false))]));
    let controller = controller_for(&driver);
    controller.connect().await.unwrap();

    // The device grows a datapoint while offline; the logical layout the
    // UI was built against must not shift.
    driver
        .datapoints
        .lock()
        .unwrap()
        .insert("3".to_string(), json!(true));
    driver.emit(DriverEvent::Disconnected);

    wait_for_status(&controller, ConnectionStatus::Connected).await;
    assert_eq!(controller.field_count().await, Some(2));
    assert_eq!(controller.states().await.map(|s| s.len()), Some(2));
}

#[tokio::test]
async fn test_error_events_are_swallowed() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = controller_for(&driver);
    controller.connect().await.unwrap();

    driver.emit(DriverEvent::Error("transient protocol noise".to_string()));
    sleep(Duration::from_millis(50)).await;

    assert_eq!(controller.status().await, ConnectionStatus::Connected);
    assert_eq!(driver.connect_count(), 1);
}

#[tokio::test]
async fn test_disconnect_burst_coalesces_into_one_reconnect() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = {
        let driver: Arc<dyn DeviceDriver> = driver.clone();
        DeviceController::with_retry_delay(driver, Duration::from_millis(30))
    };
    controller.connect().await.unwrap();

    driver.emit(DriverEvent::Disconnected);
    driver.emit(DriverEvent::Disconnected);
    driver.emit(DriverEvent::Disconnected);

    wait_for_status(&controller, ConnectionStatus::Connected).await;
    sleep(Duration::from_millis(150)).await;

    // One initial connect plus exactly one reconnect for the whole burst.
    assert_eq!(driver.connect_count(), 2);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_reconnects() {
    let driver = Arc::new(ScriptedDriver::new(&[("1", json!(true))]));
    let controller = controller_for(&driver);
    controller.connect().await.unwrap();

    controller.shutdown();
    driver.emit(DriverEvent::Disconnected);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(driver.connect_count(), 1);
}
