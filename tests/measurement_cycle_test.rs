//! End-to-end measurement cycles through the controller against the simulator.

mod common;

use common::{controller, poll_until, test_config};
use snom_scan::error::ScanError;
use snom_scan::hardware::{FailurePlan, SimulatedSnom};
use snom_scan::session::SessionState;
use snom_scan::storage::read_metadata;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_connect_measure_disconnect() {
    let dir = tempdir().unwrap();
    let sim = SimulatedSnom::with_scan_duration(Duration::from_millis(20));
    let mut controller = controller(&sim, test_config(&dir));

    controller.edit_integer("resolution_width", 10).unwrap();
    controller.edit_integer("resolution_height", 10).unwrap();

    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().connected));
    assert_eq!(controller.state(), SessionState::Connected);
    assert!(controller.frontend().measure_enabled);

    controller.start_measurement().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c
        .frontend()
        .notices
        .iter()
        .any(|n| n.starts_with("Measurement finished"))));
    assert_eq!(sim.scan_count(), 1);
    assert_eq!(sim.last_approach_strength(), Some(0.8));

    let files: Vec<_> = fs::read_dir(dir.path().join("data"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);

    let metadata = read_metadata(&files[0]).unwrap();
    assert_eq!(metadata.parameters.scan.resolution_width, 10);
    assert_eq!(metadata.instrument, "simulated");

    let content = fs::read_to_string(&files[0]).unwrap();
    let mut data_lines = content.lines().filter(|line| !line.starts_with('#'));
    assert_eq!(data_lines.next(), Some("O0A,O1A,O2A,O3A,O4A,M1A,Z"));
    assert_eq!(data_lines.count(), 100);

    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| !c.frontend().connected));
    assert_eq!(sim.disconnect_count(), 1);
    assert!(!sim.is_connected());

    assert!(controller.request_exit());
}

#[test]
fn test_failed_scan_keeps_connection() {
    let dir = tempdir().unwrap();
    let sim = SimulatedSnom::with_scan_duration(Duration::from_millis(20));
    let mut controller = controller(&sim, test_config(&dir));

    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().connected));

    sim.set_failures(FailurePlan {
        fail_during_scan: true,
        ..FailurePlan::default()
    });
    controller.start_measurement().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| !c.frontend().errors.is_empty()));
    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().measure_enabled));
    assert_eq!(controller.state(), SessionState::Connected);
    assert!(!dir.path().join("data").exists());

    // the instrument is still usable
    sim.set_failures(FailurePlan::default());
    controller.start_measurement().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c
        .frontend()
        .notices
        .iter()
        .any(|n| n.starts_with("Measurement finished"))));
}

#[test]
fn test_refused_connection_can_be_retried() {
    let dir = tempdir().unwrap();
    let sim = SimulatedSnom::new();
    sim.set_failures(FailurePlan {
        refuse_connection: true,
        ..FailurePlan::default()
    });
    let mut controller = controller(&sim, test_config(&dir));

    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| !c.frontend().errors.is_empty()
        && !c.is_busy()));
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert!(!controller.frontend().connected);

    sim.set_failures(FailurePlan::default());
    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().connected));
    assert_eq!(sim.connect_count(), 2);
}

#[test]
fn test_second_measurement_is_rejected_while_running() {
    let dir = tempdir().unwrap();
    let sim = SimulatedSnom::with_scan_duration(Duration::from_millis(300));
    let mut controller = controller(&sim, test_config(&dir));

    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().connected));

    controller.start_measurement().unwrap();
    let err = controller.start_measurement().unwrap_err();
    assert!(matches!(
        err,
        ScanError::SessionBusy
            | ScanError::InvalidState {
                state: SessionState::Measuring,
                ..
            }
    ));
    assert!(!controller.frontend().measure_enabled);

    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().measure_enabled));
    assert_eq!(sim.scan_count(), 1);
}

#[test]
fn test_disconnect_during_measurement_is_refused() {
    let dir = tempdir().unwrap();
    let sim = SimulatedSnom::with_scan_duration(Duration::from_millis(300));
    let mut controller = controller(&sim, test_config(&dir));

    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().connected));

    controller.start_measurement().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c.state() == SessionState::Measuring));

    let err = controller.toggle_connection().unwrap_err();
    assert!(matches!(
        err,
        ScanError::InvalidState {
            action: "disconnect",
            state: SessionState::Measuring,
        }
    ));
    assert!(controller.frontend().errors.iter().any(|e| e.contains("disconnect")));

    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().measure_enabled));
    assert_eq!(sim.disconnect_count(), 0);
    assert_eq!(controller.state(), SessionState::Connected);
}

#[test]
fn test_channel_selection_from_config() {
    let dir = tempdir().unwrap();
    let sim = SimulatedSnom::with_scan_duration(Duration::from_millis(10));
    let mut config = test_config(&dir);
    config.channels = vec!["O2A".into(), "Z".into()];
    let mut controller = controller(&sim, config);

    controller.edit_integer("resolution_width", 2).unwrap();
    controller.edit_integer("resolution_height", 3).unwrap();
    controller.toggle_connection().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c.frontend().connected));
    controller.start_measurement().unwrap();
    assert!(poll_until(&mut controller, WAIT, |c| c
        .frontend()
        .notices
        .iter()
        .any(|n| n.starts_with("Measurement finished"))));

    let file = fs::read_dir(dir.path().join("data"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let content = fs::read_to_string(file).unwrap();
    let data: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(data[0], "O2A,Z");
    assert_eq!(data.len(), 7);
}
