//! Controller between the operator surface and the instrument.
//!
//! The [`Controller`] runs on the UI thread. It owns both parameter sets, the
//! time estimator and the [`SessionHandle`] of the instrument worker:
//!
//! ```text
//! field edit ─> ParameterSet commit ─> "parameters changed"
//!                                         ├─> TimeEstimator ─> Frontend::show_estimate
//!                                         └─> SessionHandle::configure (pending config)
//! connect / measure ─> SessionHandle ─> worker ─> SessionEvent ─> poll() ─> Frontend
//! ```
//!
//! The UI surface itself is a collaborator behind the [`Frontend`] trait, so the
//! same controller drives a GUI, the console frontend of the CLI, or a test double.

use crate::config::InstrumentConfig;
use crate::error::{ScanError, ScanResult};
use crate::estimator::TimeEstimator;
use crate::hardware::registry::DriverRegistry;
use crate::hardware::{SimulatedSnom, SnomSdk};
use crate::messages::SessionEvent;
use crate::parameter::{
    InterferometerParameters, MeasurementParameters, ParameterSet, ScanParameters,
};
use crate::session::{InstrumentSession, SessionState};
use crate::settings::{load_settings, save_settings};
use crate::worker::{SessionEvents, SessionHandle, SessionWorker};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Span};

/// How long shutdown waits for the worker to release the instrument.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Answer to "the instrument is not configured".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineDecision {
    /// Keep editing parameters without an instrument
    Continue,
    /// Give up
    Abort,
}

/// Operator-facing surface driven by the controller.
pub trait Frontend {
    /// Replace the estimated-duration label.
    fn show_estimate(&mut self, text: &str);

    /// Binary connection indicator.
    fn set_connected(&mut self, connected: bool);

    /// Enable or disable the start-measurement action.
    fn set_measure_enabled(&mut self, enabled: bool);

    /// Show an error; `recoverable` errors may be shown inline.
    fn show_error(&mut self, message: &str, recoverable: bool);

    /// Show an informational message.
    fn show_notice(&mut self, message: &str);

    /// Blocking choice when the SDK settings are placeholders.
    fn ask_offline_mode(&mut self, reason: &str) -> OfflineDecision;

    /// Exit confirmation prompt.
    fn confirm_exit(&mut self) -> bool;
}

/// Wires parameter edits, the estimate and the instrument worker together.
pub struct Controller<F: Frontend> {
    frontend: F,
    config: InstrumentConfig,
    scan: ParameterSet<ScanParameters>,
    interferometer: ParameterSet<InterferometerParameters>,
    scan_rx: watch::Receiver<ScanParameters>,
    interferometer_rx: watch::Receiver<InterferometerParameters>,
    estimator: TimeEstimator,
    session: SessionHandle,
    events: SessionEvents,
    worker: Option<JoinHandle<()>>,
    offline: bool,
    shown_state: SessionState,
    span: Span,
}

impl<F: Frontend> Controller<F> {
    /// Build the controller: load the saved settings, resolve the driver, start
    /// the worker and bring the frontend up to date.
    ///
    /// Settings are loaded before the worker starts, so a failed construction
    /// never reaches the save-on-drop path. With placeholder SDK settings no
    /// driver is resolved; the session stays disconnected until offline mode is
    /// chosen.
    ///
    /// # Errors
    /// [`ScanError::Configuration`] if the SDK is configured but no driver is
    /// registered for the instrument; [`ScanError::Io`] if the worker thread
    /// cannot start or the settings file cannot be read.
    pub fn new(
        config: InstrumentConfig,
        registry: &DriverRegistry,
        frontend: F,
    ) -> ScanResult<Self> {
        let span = info_span!("controller", instrument = %config.instrument);

        let mut scan = ParameterSet::<ScanParameters>::new()
            .with_span(info_span!(parent: &span, "parameters", group = "scan"));
        let mut interferometer = ParameterSet::<InterferometerParameters>::new()
            .with_span(info_span!(parent: &span, "parameters", group = "interferometer"));
        let saved = load_settings(&config.settings_path)?;
        scan.load(&saved.scan)?;
        interferometer.load(&saved.interferometer)?;
        let scan_rx = scan.subscribe();
        let interferometer_rx = interferometer.subscribe();

        let sdk = Self::driver(&config, registry, &span)?;
        let session = InstrumentSession::new(sdk, config.session_options())
            .with_span(info_span!(parent: &span, "session"));
        let (handle, events, worker) =
            SessionWorker::spawn(session, Some(info_span!(parent: &span, "worker")))?;

        let mut controller = Self {
            frontend,
            config,
            scan,
            interferometer,
            scan_rx,
            interferometer_rx,
            estimator: TimeEstimator::new(),
            session: handle,
            events,
            worker: Some(worker),
            offline: false,
            shown_state: SessionState::Disconnected,
            span,
        };

        controller.frontend.set_connected(false);
        controller.frontend.set_measure_enabled(false);
        controller.refresh(true);
        Ok(controller)
    }

    /// Driver for the configured instrument. An unconfigured SDK gets an idle
    /// simulator that is never connected.
    fn driver(
        config: &InstrumentConfig,
        registry: &DriverRegistry,
        span: &Span,
    ) -> ScanResult<Arc<dyn SnomSdk>> {
        if config.is_configured() {
            return registry.resolve(config.instrument);
        }
        span.in_scope(|| debug!("SDK not configured, instrument driver not loaded"));
        Ok(Arc::new(SimulatedSnom::new()))
    }

    /// The driven frontend.
    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    /// Mutable access to the frontend.
    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.frontend
    }

    /// Configuration the controller was built with.
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Session state as last published by the worker.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether an instrument operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    /// Whether the operator chose to continue without an instrument.
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Scan parameter set.
    pub fn scan_parameters(&self) -> &ParameterSet<ScanParameters> {
        &self.scan
    }

    /// Interferometer parameter set.
    pub fn interferometer_parameters(&self) -> &ParameterSet<InterferometerParameters> {
        &self.interferometer
    }

    /// Merged snapshot of both parameter sets.
    pub fn parameters(&self) -> MeasurementParameters {
        MeasurementParameters::merge(self.scan.snapshot(), self.interferometer.snapshot())
    }

    /// Currently displayed estimate.
    pub fn estimate(&self) -> &str {
        self.estimator.display()
    }

    /// Live text edit of a field. Returns whether the text was taken.
    pub fn edit_text(&mut self, name: &str, raw: &str) -> ScanResult<bool> {
        if self.scan.input(name).is_some() {
            self.scan.set_text(name, raw)
        } else {
            self.interferometer.set_text(name, raw)
        }
    }

    /// Set an integer field (clamped into its range) and report the edit.
    pub fn edit_integer(&mut self, name: &str, value: i64) -> ScanResult<()> {
        let result = if self.scan.input(name).is_some() {
            self.scan.set_integer(name, value).map(|_| ())
        } else {
            self.interferometer.set_integer(name, value).map(|_| ())
        };
        self.after_edit(result)
    }

    /// Confirm a field (enter pressed or focus lost).
    ///
    /// A parse failure reverts the field and is shown inline; the error is also
    /// returned.
    pub fn commit(&mut self, name: &str) -> ScanResult<()> {
        let result = if self.scan.input(name).is_some() {
            self.scan.commit(name).map(|_| ())
        } else {
            self.interferometer.commit(name).map(|_| ())
        };
        self.after_edit(result)
    }

    fn after_edit(&mut self, result: ScanResult<()>) -> ScanResult<()> {
        if let Err(e) = &result {
            self.frontend.show_error(&e.to_string(), e.can_recover());
        }
        self.refresh(false);
        result
    }

    /// Push pending parameter changes to the estimate and to the session.
    fn refresh(&mut self, force: bool) {
        let changed = self.scan_rx.has_changed().unwrap_or(false)
            || self.interferometer_rx.has_changed().unwrap_or(false);
        if !changed && !force {
            return;
        }
        let scan = self.scan_rx.borrow_and_update().clone();
        let interferometer = self.interferometer_rx.borrow_and_update().clone();

        if let Some(text) = self.estimator.update(Some(&scan), Some(&interferometer)) {
            self.frontend.show_estimate(text);
        }
        let params = MeasurementParameters::merge(scan, interferometer);
        if let Err(e) = self.session.configure(params) {
            self.span
                .in_scope(|| warn!(error = %e, "pending configuration not forwarded"));
        }
    }

    /// Connect when disconnected, disconnect when connected.
    ///
    /// With placeholder SDK settings the operator chooses between offline mode
    /// and aborting; abort is returned as [`ScanError::Configuration`].
    pub fn toggle_connection(&mut self) -> ScanResult<()> {
        let state = self.session.state();
        let result = if state.is_connected() {
            self.session.disconnect().map(|_| ())
        } else if self.offline {
            self.frontend
                .show_notice("Offline mode: no instrument connection will be made");
            return Ok(());
        } else if !self.config.is_configured() {
            return self.choose_offline();
        } else {
            self.span.in_scope(|| info!(host = %self.config.host, "connect requested"));
            self.session.connect(self.config.endpoint()).map(|_| ())
        };

        if let Err(e) = &result {
            self.frontend.show_error(&e.to_string(), e.can_recover());
        }
        result
    }

    fn choose_offline(&mut self) -> ScanResult<()> {
        let reason = "The instrument SDK is not configured (path_to_dll / fingerprint). \
                      Continue without an instrument?";
        match self.frontend.ask_offline_mode(reason) {
            OfflineDecision::Continue => {
                self.offline = true;
                self.span.in_scope(|| info!("continuing in offline mode"));
                self.frontend.set_connected(false);
                self.frontend.set_measure_enabled(false);
                Ok(())
            }
            OfflineDecision::Abort => Err(ScanError::Configuration(
                "instrument SDK is not configured".into(),
            )),
        }
    }

    /// Start a measurement with the current parameters.
    pub fn start_measurement(&mut self) -> ScanResult<()> {
        let params = self.parameters();
        match self.session.start_measurement(params) {
            Ok(_) => {
                self.span.in_scope(|| info!("measurement requested"));
                self.frontend.set_measure_enabled(false);
                Ok(())
            }
            Err(e) => {
                self.frontend.show_error(&e.to_string(), e.can_recover());
                Err(e)
            }
        }
    }

    /// Drain worker events into the frontend. Returns the number handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.worker.is_some() {
                        self.span.in_scope(|| error!("instrument worker stopped unexpectedly"));
                    }
                    break;
                }
            }
        }
        self.sync_indicators(handled > 0);
        handled
    }

    fn handle_event(&mut self, event: SessionEvent) {
        self.span.in_scope(|| debug!(?event, "session event"));
        match event {
            SessionEvent::Connected => self.frontend.show_notice("Connected to instrument"),
            SessionEvent::Disconnected => self.frontend.show_notice("Disconnected"),
            SessionEvent::MeasurementFinished(report) => self.frontend.show_notice(&format!(
                "Measurement finished, data saved to {}",
                report.path.display()
            )),
            SessionEvent::Failed {
                action,
                message,
                recoverable,
            } => {
                self.span
                    .in_scope(|| warn!(%action, %message, "instrument operation failed"));
                self.frontend.show_error(&message, recoverable);
            }
        }
    }

    fn sync_indicators(&mut self, force: bool) {
        let state = self.session.state();
        if state == self.shown_state && !force {
            return;
        }
        self.shown_state = state;
        self.frontend.set_connected(state.is_connected());
        self.frontend.set_measure_enabled(state.can_start_measurement());
    }

    /// Persist both parameter sets to the configured settings file.
    pub fn save_settings(&mut self) -> ScanResult<()> {
        let path: PathBuf = self.config.settings_path.clone();
        save_settings(&path, &self.parameters()).map_err(|e| {
            self.frontend.show_error(&e.to_string(), e.can_recover());
            e
        })
    }

    /// Exit requested by the operator. Returns true when the process should exit.
    pub fn request_exit(&mut self) -> bool {
        if !self.frontend.confirm_exit() {
            return false;
        }
        self.shutdown();
        true
    }

    /// Save settings, release the instrument and stop the worker. Best effort:
    /// failures are logged, never returned.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _enter = self.span.enter();
        if let Err(e) = save_settings(&self.config.settings_path, &self.parameters()) {
            warn!(error = %e, "settings not saved on exit");
        }
        if let Err(e) = self.session.shutdown() {
            warn!(error = %e, "worker did not accept shutdown");
        }

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        while !worker.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if worker.is_finished() {
            if worker.join().is_err() {
                error!("instrument worker panicked");
            }
            info!("controller shut down");
        } else {
            warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "instrument worker still busy, leaving it behind"
            );
        }
    }
}

impl<F: Frontend> Drop for Controller<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
