//! Hardware tests against a microcontroller running the LED-blink firmware.
//!
//! Run with: MCU_PANEL_TEST_PORT=/dev/ttyACM0 cargo test --test hardware_serial_test --features hardware_tests -- --ignored --nocapture
//!
//! Hardware Setup:
//! - Board flashed with the blink firmware, 9600 baud 8N1
//! - Opening the port resets the board, which then prints `@STARTED`

#![cfg(feature = "hardware_tests")]

use mcu_panel::protocol;
use mcu_panel::{enumerate_available_ports, SerialSession, DEFAULT_BAUD_RATE};
use std::time::Duration;

fn test_port() -> String {
    std::env::var("MCU_PANEL_TEST_PORT").unwrap_or_else(|_| "/dev/ttyACM0".to_string())
}

#[test]
#[ignore] // Hardware-only test
fn test_port_is_enumerated() {
    let ports = enumerate_available_ports();
    println!("Available ports: {ports:?}");
    assert!(ports.contains(&test_port()));
}

#[test]
#[ignore]
fn test_startup_and_blink() {
    let session = SerialSession::connect(&test_port(), DEFAULT_BAUD_RATE).unwrap();
    assert!(protocol::await_startup(&session, Duration::from_secs(5)));

    protocol::blink_led(&session, 3, Duration::from_secs(10)).unwrap();
    session.wait_for_idle(Duration::from_millis(200));
    assert!(session.terminate());
}

#[test]
#[ignore]
fn test_unknown_port_lists_alternatives() {
    let err = SerialSession::connect("/dev/does-not-exist", DEFAULT_BAUD_RATE)
        .err()
        .unwrap();
    println!("{err}");
    assert!(matches!(err, mcu_panel::PanelError::PortNotFound { .. }));
}
