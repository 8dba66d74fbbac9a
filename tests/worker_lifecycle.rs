//! Session worker against the simulated firmware.

use mcu_panel::{
    MockAdapter, MockDevice, PanelError, SerialSession, SessionEvent, SessionWorker,
    WorkerSettings,
};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> WorkerSettings {
    WorkerSettings {
        startup_timeout: Duration::from_millis(500),
        command_timeout: Duration::from_secs(2),
        idle_wait: Duration::from_millis(10),
    }
}

/// Spawn a worker on a simulated port; events arrive on the returned channel.
fn spawn_simulated(greet: bool) -> (SessionWorker, MockDevice, mpsc::Receiver<SessionEvent>) {
    let adapter = MockAdapter::new("SIM0", 9600);
    let device = adapter.device();
    device.emulate_blink_firmware(Duration::from_millis(5));
    if !greet {
        device.set_greeting(None);
    }

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let worker = SessionWorker::spawn(
        "SIM0",
        settings(),
        move || {
            SerialSession::with_port(Box::new(adapter))
                .map(|s| s.with_poll_interval(Duration::from_millis(10)))
        },
        move |event| {
            let _ = tx.lock().send(event);
        },
    )
    .unwrap();
    (worker, device, rx)
}

fn next_event(rx: &mpsc::Receiver<SessionEvent>) -> SessionEvent {
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

fn wait_for_event(rx: &mpsc::Receiver<SessionEvent>, wanted: &SessionEvent) {
    loop {
        if &next_event(rx) == wanted {
            return;
        }
    }
}

#[test]
fn test_blink_request_round_trip() {
    let (worker, device, rx) = spawn_simulated(true);

    assert_eq!(
        next_event(&rx),
        SessionEvent::Connecting {
            port: "SIM0".to_string()
        }
    );
    assert_eq!(
        next_event(&rx),
        SessionEvent::Ready {
            port: "SIM0".to_string()
        }
    );
    assert!(worker.is_active());

    assert!(worker.request_blink(4));
    assert_eq!(
        next_event(&rx),
        SessionEvent::CommandStarted {
            command: "*BLINK_LED,4".to_string()
        }
    );
    assert_eq!(
        next_event(&rx),
        SessionEvent::CommandSucceeded {
            command: "*BLINK_LED,4".to_string()
        }
    );
    assert_eq!(device.written(), vec!["*BLINK_LED,4\n".to_string()]);

    worker.join();
    assert_eq!(
        next_event(&rx),
        SessionEvent::Terminated {
            port: "SIM0".to_string()
        }
    );
    assert!(!device.is_open());
}

#[test]
fn test_out_of_range_blink_reports_failure() {
    let (worker, device, rx) = spawn_simulated(true);
    wait_for_event(
        &rx,
        &SessionEvent::Ready {
            port: "SIM0".to_string(),
        },
    );

    assert!(worker.request_blink(0));
    next_event(&rx);
    match next_event(&rx) {
        SessionEvent::CommandFailed { command, .. } => assert_eq!(command, "*BLINK_LED,0"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(device.write_count(), 0);
}

#[test]
fn test_silent_device_times_out_and_releases_port() {
    let (worker, device, rx) = spawn_simulated(false);

    next_event(&rx);
    assert_eq!(
        next_event(&rx),
        SessionEvent::StartupTimeout {
            port: "SIM0".to_string(),
            waited: Duration::from_millis(500),
        }
    );
    assert_eq!(
        next_event(&rx),
        SessionEvent::Terminated {
            port: "SIM0".to_string()
        }
    );
    assert!(!worker.request_blink(1));
    assert!(!device.is_open());
}

#[test]
fn test_unplug_reports_connection_lost() {
    let (worker, device, rx) = spawn_simulated(true);
    wait_for_event(
        &rx,
        &SessionEvent::Ready {
            port: "SIM0".to_string(),
        },
    );

    device.unplug();
    assert_eq!(
        next_event(&rx),
        SessionEvent::ConnectionLost {
            port: "SIM0".to_string()
        }
    );
    assert_eq!(
        next_event(&rx),
        SessionEvent::Terminated {
            port: "SIM0".to_string()
        }
    );
    assert!(!worker.is_active());
}

#[test]
fn test_connect_failure_is_reported() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let worker = SessionWorker::spawn(
        "COM99",
        settings(),
        || {
            Err(PanelError::PortNotFound {
                port: "COM99".to_string(),
                available: vec!["COM1".to_string()],
            })
        },
        {
            let events = Arc::clone(&events);
            move |event| events.lock().push(event)
        },
    )
    .unwrap();
    worker.join();

    let events = events.lock();
    assert_eq!(events.len(), 2);
    match &events[1] {
        SessionEvent::ConnectFailed { port, reason } => {
            assert_eq!(port, "COM99");
            assert!(reason.contains("COM1"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}
