//! Instrument session state machine.
//!
//! `InstrumentSession` owns the connection to the instrument control server and
//! everything tied to it: the vendor session, the scan template fetched on
//! connect, and the pending measurement configuration.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect──> Connecting ──ok──> Connected ──start──> Measuring
//!      ▲                         │                 │   ▲                │
//!      │                       error               │   └──done/failed───┘
//!      └─────────────────────────┴────disconnect───┘
//! ```
//!
//! - `connect` is only accepted from `Disconnected`, and never with placeholder
//!   SDK settings.
//! - `disconnect` while `Measuring` is rejected; while `Disconnected` it is a no-op.
//! - A measurement always ends back in `Connected`, whether it succeeded or not.

use crate::config::is_placeholder;
use crate::error::{ScanError, ScanResult};
use crate::hardware::sdk::{Endpoint, ScanDescription, ScanHandle, ScanTemplate, SdkSession, SnomSdk};
use crate::parameter::MeasurementParameters;
use crate::storage::{CsvWriter, MeasurementReport, RunMetadata};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Default approach setpoint.
pub const DEFAULT_APPROACH_STRENGTH: f64 = 0.8;

/// Connection and measurement lifecycle of the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection
    #[default]
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected and idle
    Connected,
    /// A scan is running
    Measuring,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Measuring => write!(f, "Measuring"),
        }
    }
}

impl SessionState {
    /// Check if the state allows a connection attempt.
    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Disconnected)
    }

    /// Check if the state allows disconnecting (or is already disconnected).
    pub fn can_disconnect(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Disconnected)
    }

    /// Check if the state allows starting a measurement.
    pub fn can_start_measurement(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Whether a vendor session is held.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Measuring)
    }
}

/// Measurement-related knobs that come from the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Approach setpoint, 0.0 to 1.0
    pub approach_strength: f64,
    /// Upper bound for the scan wait; `None` waits indefinitely
    pub scan_timeout: Option<Duration>,
    /// Channels to download; empty means the template defaults
    pub channels: Vec<String>,
    /// Directory measurement files are written to
    pub data_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            approach_strength: DEFAULT_APPROACH_STRENGTH,
            scan_timeout: None,
            channels: Vec::new(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Connection and measurement lifecycle around one SDK binding.
pub struct InstrumentSession {
    sdk: Arc<dyn SnomSdk>,
    options: SessionOptions,
    writer: CsvWriter,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    connection: Option<Arc<dyn SdkSession>>,
    template: Option<ScanTemplate>,
    pending: MeasurementParameters,
    span: Span,
}

impl InstrumentSession {
    pub fn new(sdk: Arc<dyn SnomSdk>, options: SessionOptions) -> Self {
        let writer = CsvWriter::new(options.data_dir.clone());
        Self {
            span: info_span!("session", sdk = sdk.name()),
            sdk,
            options,
            writer,
            state: SessionState::Disconnected,
            state_tx: watch::channel(SessionState::Disconnected).0,
            connection: None,
            template: None,
            pending: MeasurementParameters::default(),
        }
    }

    /// Emit all session events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Watch every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Configuration the next measurement will use unless told otherwise.
    pub fn pending_config(&self) -> &MeasurementParameters {
        &self.pending
    }

    /// Scan template fetched from the server on connect.
    pub fn template(&self) -> Option<&ScanTemplate> {
        self.template.as_ref()
    }

    /// Keep the pending configuration in sync with parameter edits.
    pub fn configure(&mut self, params: MeasurementParameters) {
        self.span.in_scope(|| debug!("pending configuration updated"));
        self.pending = params;
    }

    /// Connect to the instrument control server.
    ///
    /// # Errors
    /// - [`ScanError::InvalidState`] unless `Disconnected`
    /// - [`ScanError::Configuration`] if the endpoint still holds placeholder values
    /// - [`ScanError::Connection`] if the server refuses or the template cannot be
    ///   fetched; the session is `Disconnected` afterwards
    pub async fn connect(&mut self, endpoint: &Endpoint) -> ScanResult<()> {
        let span = self.span.clone();
        self.connect_inner(endpoint).instrument(span).await
    }

    async fn connect_inner(&mut self, endpoint: &Endpoint) -> ScanResult<()> {
        if !self.state.can_connect() {
            warn!(state = %self.state, "connect rejected");
            return Err(ScanError::InvalidState {
                action: "connect",
                state: self.state,
            });
        }
        if is_placeholder(&endpoint.library_path.to_string_lossy())
            || is_placeholder(&endpoint.fingerprint)
        {
            warn!("SDK endpoint is not configured");
            return Err(ScanError::Configuration(
                "path_to_dll and fingerprint must be set in the configuration file".into(),
            ));
        }

        self.set_state(SessionState::Connecting);
        info!(host = %endpoint.host, "connecting to instrument server");

        let connection: Arc<dyn SdkSession> = match self.sdk.connect(endpoint).await {
            Ok(session) => Arc::from(session),
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                error!(error = %e, "connection failed");
                return Err(ScanError::Connection(e.to_string()));
            }
        };

        match connection.spawn_default_scan_parameters().await {
            Ok(template) => {
                self.template = Some(template);
                self.connection = Some(connection);
                self.set_state(SessionState::Connected);
                info!("connected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to load scan template, releasing connection");
                if let Err(close) = connection.disconnect().await {
                    warn!(error = %close, "release after failed connect also failed");
                }
                self.set_state(SessionState::Disconnected);
                Err(ScanError::Connection(e.to_string()))
            }
        }
    }

    /// Refresh the cached scan template from the server.
    pub async fn spawn_default_scan_parameters(&mut self) -> ScanResult<ScanTemplate> {
        let Some(connection) = self.connection.clone() else {
            return Err(ScanError::InvalidState {
                action: "load scan defaults",
                state: self.state,
            });
        };
        let template = connection
            .spawn_default_scan_parameters()
            .instrument(self.span.clone())
            .await
            .map_err(|e| ScanError::Connection(e.to_string()))?;
        self.template = Some(template.clone());
        Ok(template)
    }

    /// Release the vendor session.
    ///
    /// A no-op when already `Disconnected`. A failing vendor disconnect is logged;
    /// the session is `Disconnected` afterwards either way.
    ///
    /// # Errors
    /// [`ScanError::InvalidState`] while `Connecting` or `Measuring`.
    pub async fn disconnect(&mut self) -> ScanResult<()> {
        let span = self.span.clone();
        async {
            match self.state {
                SessionState::Disconnected => {
                    info!("already disconnected, nothing to do");
                    Ok(())
                }
                SessionState::Connecting | SessionState::Measuring => {
                    warn!(state = %self.state, "disconnect rejected");
                    Err(ScanError::InvalidState {
                        action: "disconnect",
                        state: self.state,
                    })
                }
                SessionState::Connected => {
                    self.release().await;
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            match connection.disconnect().await {
                Ok(()) => info!("disconnected"),
                Err(e) => warn!(error = %e, "instrument did not disconnect cleanly"),
            }
        }
        self.template = None;
        self.set_state(SessionState::Disconnected);
    }

    /// Run one measurement with `params` and persist the acquired channels.
    ///
    /// # Errors
    /// - [`ScanError::InvalidState`] unless `Connected`; nothing changes
    /// - [`ScanError::MeasurementConfig`] if the scan cannot be built; stays `Connected`
    /// - [`ScanError::MeasurementRuntime`] if approach, scan or download fails;
    ///   the session is back in `Connected` when this returns
    pub async fn start_measurement(
        &mut self,
        params: MeasurementParameters,
    ) -> ScanResult<MeasurementReport> {
        let span = self.span.clone();
        self.start_measurement_inner(params).instrument(span).await
    }

    async fn start_measurement_inner(
        &mut self,
        params: MeasurementParameters,
    ) -> ScanResult<MeasurementReport> {
        let (Some(connection), SessionState::Connected) = (self.connection.clone(), self.state)
        else {
            warn!(state = %self.state, "measurement rejected");
            return Err(ScanError::InvalidState {
                action: "start a measurement",
                state: self.state,
            });
        };
        self.pending = params.clone();

        let scan = match self.construct_scan(connection.as_ref(), &params).await {
            Ok(scan) => scan,
            Err(e) => {
                error!(error = %e, "scan construction failed");
                return Err(e);
            }
        };

        self.set_state(SessionState::Measuring);
        let started = Utc::now();
        info!(scan = scan.id, pixels = scan.description.pixel_count(), "measurement started");

        let outcome = self.acquire(connection.as_ref(), &scan).await;
        self.set_state(SessionState::Connected);

        let channels = match outcome {
            Ok(channels) => channels,
            Err(e) => {
                error!(error = %e, "measurement failed, no data was saved");
                return Err(e);
            }
        };

        let metadata = RunMetadata {
            run_id: Uuid::new_v4(),
            started,
            finished: Utc::now(),
            instrument: self.sdk.name().to_string(),
            parameters: params,
        };
        let report = self.writer.write(&metadata, &channels).map_err(|e| {
            error!(error = %e, "acquired data could not be written");
            e
        })?;
        info!(run_id = %report.run_id, "measurement finished");
        Ok(report)
    }

    async fn construct_scan(
        &self,
        connection: &dyn SdkSession,
        params: &MeasurementParameters,
    ) -> ScanResult<ScanHandle> {
        let mut template = self
            .template
            .clone()
            .ok_or_else(|| ScanError::MeasurementConfig("no scan template loaded".into()))?;
        if !self.options.channels.is_empty() {
            template.channels = self.options.channels.clone();
        }
        let description = ScanDescription::new(&template, params)
            .map_err(|e| ScanError::MeasurementConfig(e.to_string()))?;
        connection
            .construct_scan(&description)
            .await
            .map_err(|e| ScanError::MeasurementConfig(e.to_string()))
    }

    async fn acquire(
        &self,
        connection: &dyn SdkSession,
        scan: &ScanHandle,
    ) -> ScanResult<Vec<(String, Vec<f64>)>> {
        let runtime = |stage: &str, e: anyhow::Error| {
            ScanError::MeasurementRuntime(format!("{}: {}", stage, e))
        };

        connection
            .approach(self.options.approach_strength)
            .await
            .map_err(|e| runtime("approach", e))?;
        connection.scan(scan).await.map_err(|e| runtime("scan", e))?;

        match self.options.scan_timeout {
            Some(limit) => tokio::time::timeout(limit, connection.wait_for_scan(scan))
                .await
                .map_err(|_| {
                    ScanError::MeasurementRuntime(format!(
                        "scan did not finish within {} s",
                        limit.as_secs()
                    ))
                })?
                .map_err(|e| runtime("scan", e))?,
            None => {
                warn!("no scan timeout configured, waiting for the scan indefinitely");
                connection
                    .wait_for_scan(scan)
                    .await
                    .map_err(|e| runtime("scan", e))?
            }
        }

        let mut channels = Vec::with_capacity(scan.description.channels.len());
        for name in &scan.description.channels {
            let data = connection
                .read_channel(scan, name)
                .await
                .map_err(|e| runtime("download", e))?;
            channels.push((name.clone(), data));
        }
        Ok(channels)
    }

    /// Best-effort teardown at process exit. Failures are logged, never returned.
    pub async fn shutdown(&mut self) {
        let span = self.span.clone();
        async {
            if self.state.is_connected() || self.connection.is_some() {
                info!(state = %self.state, "releasing instrument on shutdown");
                self.release().await;
            } else {
                debug!("shutdown with no open connection");
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("sdk", &self.sdk.name())
            .field("state", &self.state)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{FailurePlan, SimulatedSnom};
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "nea-server".into(),
            fingerprint: "12:34:56".into(),
            library_path: PathBuf::from("/opt/neaspec/sdk"),
        }
    }

    fn small_params() -> MeasurementParameters {
        let mut params = MeasurementParameters::default();
        params.scan.resolution_width = 3;
        params.scan.resolution_height = 2;
        params
    }

    fn session(snom: &SimulatedSnom, data_dir: PathBuf) -> InstrumentSession {
        InstrumentSession::new(
            Arc::new(snom.clone()),
            SessionOptions {
                data_dir,
                ..SessionOptions::default()
            },
        )
    }

    #[test]
    fn test_state_guards() {
        assert!(SessionState::Disconnected.can_connect());
        assert!(!SessionState::Connected.can_connect());
        assert!(SessionState::Connected.can_start_measurement());
        assert!(!SessionState::Measuring.can_start_measurement());
        assert!(!SessionState::Measuring.can_disconnect());
        assert!(SessionState::Measuring.is_connected());
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_placeholder_config_never_connects() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        let mut session = session(&snom, dir.path().to_path_buf());

        let placeholder = Endpoint {
            fingerprint: "CHANGEMEE".into(),
            ..endpoint()
        };
        let err = session.connect(&placeholder).await.unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(snom.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_reaches_connected_once() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        let mut session = session(&snom, dir.path().to_path_buf());

        session.connect(&endpoint()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.template().is_some());

        let err = session.connect(&endpoint()).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidState { .. }));
        assert_eq!(snom.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_stays_disconnected() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        snom.set_failures(FailurePlan {
            refuse_connection: true,
            ..Default::default()
        });
        let mut session = session(&snom, dir.path().to_path_buf());

        let err = session.connect(&endpoint()).await.unwrap_err();
        assert!(matches!(err, ScanError::Connection(_)));
        assert_eq!(session.state(), SessionState::Disconnected);

        snom.set_failures(FailurePlan::default());
        session.connect(&endpoint()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_start_from_disconnected_is_rejected() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        let mut session = session(&snom, dir.path().to_path_buf());

        let err = session.start_measurement(small_params()).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidState {
                state: SessionState::Disconnected,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(snom.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_measurement_writes_data_and_returns_to_connected() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::with_scan_duration(Duration::from_millis(5));
        let mut session = session(&snom, dir.path().to_path_buf());
        session.connect(&endpoint()).await.unwrap();

        let report = session.start_measurement(small_params()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(report.samples_per_channel, 6);
        assert!(report.path.exists());
        assert_eq!(snom.last_approach_strength(), Some(DEFAULT_APPROACH_STRENGTH));
        assert_eq!(session.pending_config(), &small_params());
    }

    #[tokio::test]
    async fn test_configured_channels_override_template() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::with_scan_duration(Duration::from_millis(1));
        let mut session = InstrumentSession::new(
            Arc::new(snom.clone()),
            SessionOptions {
                channels: vec!["O2A".into(), "Z".into()],
                data_dir: dir.path().to_path_buf(),
                ..SessionOptions::default()
            },
        );
        session.connect(&endpoint()).await.unwrap();
        let report = session.start_measurement(small_params()).await.unwrap();

        let content = std::fs::read_to_string(report.path).unwrap();
        assert!(content.lines().any(|l| l == "O2A,Z"));
    }

    #[tokio::test]
    async fn test_rejected_scan_is_config_error_and_stays_connected() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        let mut session = session(&snom, dir.path().to_path_buf());
        session.connect(&endpoint()).await.unwrap();

        snom.set_failures(FailurePlan {
            reject_scan: true,
            ..Default::default()
        });
        let err = session.start_measurement(small_params()).await.unwrap_err();
        assert!(matches!(err, ScanError::MeasurementConfig(_)));
        assert_eq!(session.state(), SessionState::Connected);

        let mut empty_area = small_params();
        empty_area.scan.size_x = 0.0;
        snom.set_failures(FailurePlan::default());
        let err = session.start_measurement(empty_area).await.unwrap_err();
        assert!(matches!(err, ScanError::MeasurementConfig(_)));
        assert_eq!(snom.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_mid_scan_returns_to_connected() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::with_scan_duration(Duration::from_millis(5));
        let mut session = session(&snom, dir.path().to_path_buf());
        session.connect(&endpoint()).await.unwrap();

        snom.set_failures(FailurePlan {
            fail_during_scan: true,
            ..Default::default()
        });
        let err = session.start_measurement(small_params()).await.unwrap_err();
        assert!(matches!(err, ScanError::MeasurementRuntime(_)));
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_scan_timeout_returns_to_connected() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::with_scan_duration(Duration::from_secs(5));
        let mut session = InstrumentSession::new(
            Arc::new(snom.clone()),
            SessionOptions {
                scan_timeout: Some(Duration::from_millis(20)),
                data_dir: dir.path().to_path_buf(),
                ..SessionOptions::default()
            },
        );
        session.connect(&endpoint()).await.unwrap();

        let err = session.start_measurement(small_params()).await.unwrap_err();
        assert!(matches!(err, ScanError::MeasurementRuntime(_)));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_disconnect_twice_is_noop() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        let mut session = session(&snom, dir.path().to_path_buf());
        session.connect(&endpoint()).await.unwrap();

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(snom.disconnect_count(), 1);
        assert!(logs_contain("already disconnected"));
    }

    #[tokio::test]
    async fn test_failed_vendor_disconnect_still_releases() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        let mut session = session(&snom, dir.path().to_path_buf());
        session.connect(&endpoint()).await.unwrap();

        snom.set_failures(FailurePlan {
            fail_disconnect: true,
            ..Default::default()
        });
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_is_best_effort() {
        let dir = tempdir().unwrap();
        let snom = SimulatedSnom::new();
        let mut session = session(&snom, dir.path().to_path_buf());
        session.shutdown().await;
        assert_eq!(snom.disconnect_count(), 0);

        session.connect(&endpoint()).await.unwrap();
        snom.set_failures(FailurePlan {
            fail_disconnect: true,
            ..Default::default()
        });
        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(snom.disconnect_count(), 1);
    }
}
