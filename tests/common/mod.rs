//! Shared helpers for integration tests.

#![allow(dead_code)]

use snom_scan::config::InstrumentConfig;
use snom_scan::controller::{Controller, Frontend, OfflineDecision};
use snom_scan::hardware::{DriverRegistry, InstrumentKind, SimulatedSnom, SnomSdk};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Frontend that records everything it is told.
#[derive(Debug, Default)]
pub struct RecordingFrontend {
    pub estimates: Vec<String>,
    pub connected: bool,
    pub measure_enabled: bool,
    pub errors: Vec<String>,
    pub notices: Vec<String>,
    pub offline_answer: Option<OfflineDecision>,
    pub refuse_exit: bool,
}

impl Frontend for RecordingFrontend {
    fn show_estimate(&mut self, text: &str) {
        self.estimates.push(text.to_string());
    }

    fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn set_measure_enabled(&mut self, enabled: bool) {
        self.measure_enabled = enabled;
    }

    fn show_error(&mut self, message: &str, _recoverable: bool) {
        self.errors.push(message.to_string());
    }

    fn show_notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn ask_offline_mode(&mut self, _reason: &str) -> OfflineDecision {
        self.offline_answer.unwrap_or(OfflineDecision::Abort)
    }

    fn confirm_exit(&mut self) -> bool {
        !self.refuse_exit
    }
}

/// Configuration pointing every file into `dir`, with the SDK "configured".
pub fn test_config(dir: &TempDir) -> InstrumentConfig {
    InstrumentConfig {
        path_to_dll: "/opt/neaspec/sdk".into(),
        fingerprint: "00:11:22".into(),
        instrument: InstrumentKind::Simulated,
        data_dir: dir.path().join("data"),
        settings_path: dir.path().join("settings.yaml"),
        ..InstrumentConfig::default()
    }
}

/// Registry whose simulated driver is `sim`, so the test keeps an inspection handle.
pub fn registry_for(sim: &SimulatedSnom) -> DriverRegistry {
    let sim = sim.clone();
    let mut registry = DriverRegistry::new();
    registry.register(InstrumentKind::Simulated, move || {
        Arc::new(sim.clone()) as Arc<dyn SnomSdk>
    });
    registry
}

pub fn controller(
    sim: &SimulatedSnom,
    config: InstrumentConfig,
) -> Controller<RecordingFrontend> {
    Controller::new(config, &registry_for(sim), RecordingFrontend::default()).unwrap()
}

/// Poll the controller until `done` holds or `timeout` passes.
pub fn poll_until<F: Frontend>(
    controller: &mut Controller<F>,
    timeout: Duration,
    mut done: impl FnMut(&Controller<F>) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        controller.poll();
        if done(controller) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
