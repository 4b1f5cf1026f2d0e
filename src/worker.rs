//! Dedicated instrument worker.
//!
//! Connecting and measuring block for seconds to hours, so the session lives on
//! its own OS thread (`instrument-worker`) with a current-thread tokio runtime.
//! [`SessionWorker`] is the actor on that thread; [`SessionHandle`] is the cheap,
//! cloneable, never-blocking front used by the UI thread.
//!
//! Only one exclusive operation (connect, disconnect, measure) is in flight at a
//! time. The handle rejects a second one with [`ScanError::SessionBusy`] instead
//! of queueing it.

use crate::error::{ScanError, ScanResult};
use crate::hardware::sdk::Endpoint;
use crate::messages::{SessionAction, SessionEvent, SessionRequest};
use crate::parameter::MeasurementParameters;
use crate::session::{InstrumentSession, SessionState};
use crate::storage::MeasurementReport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Request queue depth.
pub const REQUEST_CAPACITY: usize = 32;

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "instrument-worker";

/// Receiving end of the worker's event stream.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Actor that exclusively owns the [`InstrumentSession`].
pub struct SessionWorker {
    session: InstrumentSession,
    events: mpsc::UnboundedSender<SessionEvent>,
    busy: Arc<AtomicBool>,
    span: Span,
}

impl SessionWorker {
    /// Move `session` onto a new worker thread.
    ///
    /// Returns the UI-side handle, the event stream and the thread's join handle.
    ///
    /// # Errors
    /// [`ScanError::Io`] if the thread cannot be spawned.
    pub fn spawn(
        session: InstrumentSession,
        span: Option<Span>,
    ) -> ScanResult<(SessionHandle, SessionEvents, JoinHandle<()>)> {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(false));
        let state_rx = session.subscribe_state();

        let worker = SessionWorker {
            session,
            events: event_tx,
            busy: busy.clone(),
            span: span.unwrap_or_else(|| info_span!("worker")),
        };

        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        worker
                            .span
                            .in_scope(|| error!(error = %e, "failed to start worker runtime"));
                        return;
                    }
                };
                runtime.block_on(worker.run(request_rx));
            })?;

        let handle = SessionHandle {
            requests: request_tx,
            state: state_rx,
            busy,
        };
        Ok((handle, event_rx, thread))
    }

    /// Process requests until `Shutdown` arrives or every handle is dropped.
    pub async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        let span = self.span.clone();
        async move {
            info!("instrument worker started");
            while let Some(request) = requests.recv().await {
                if self.handle(request).await {
                    break;
                }
            }
            // Channel closed without a Shutdown request: still release the instrument.
            if self.session.state().is_connected() {
                self.session.shutdown().await;
            }
            info!("instrument worker stopped");
        }
        .instrument(span)
        .await
    }

    /// Returns true when the worker should stop. The busy flag is cleared before
    /// an exclusive request's event and response go out, so the caller can issue
    /// the next one as soon as it sees either.
    async fn handle(&mut self, request: SessionRequest) -> bool {
        match request {
            SessionRequest::Connect { endpoint, response } => {
                let result = self.session.connect(&endpoint).await;
                self.busy.store(false, Ordering::SeqCst);
                self.publish(match &result {
                    Ok(()) => SessionEvent::Connected,
                    Err(e) => failure(SessionAction::Connect, e),
                });
                let _ = response.send(result);
            }
            SessionRequest::Disconnect { response } => {
                let result = self.session.disconnect().await;
                self.busy.store(false, Ordering::SeqCst);
                self.publish(match &result {
                    Ok(()) => SessionEvent::Disconnected,
                    Err(e) => failure(SessionAction::Disconnect, e),
                });
                let _ = response.send(result);
            }
            SessionRequest::Configure { params, response } => {
                self.session.configure(params);
                let _ = response.send(());
            }
            SessionRequest::StartMeasurement { params, response } => {
                let result = self.session.start_measurement(params).await;
                self.busy.store(false, Ordering::SeqCst);
                self.publish(match &result {
                    Ok(report) => SessionEvent::MeasurementFinished(report.clone()),
                    Err(e) => failure(SessionAction::Measure, e),
                });
                let _ = response.send(result);
            }
            SessionRequest::Shutdown { response } => {
                self.session.shutdown().await;
                let _ = response.send(());
                return true;
            }
        }
        false
    }

    fn publish(&self, event: SessionEvent) {
        debug!(?event, "session event");
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

fn failure(action: SessionAction, error: &ScanError) -> SessionEvent {
    SessionEvent::Failed {
        action,
        message: error.to_string(),
        recoverable: error.can_recover(),
    }
}

/// UI-side front of the worker. Every method returns immediately.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<SessionRequest>,
    state: watch::Receiver<SessionState>,
    busy: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Session state as last published by the worker.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Whether an exclusive operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Whether the worker is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Queue a connection attempt.
    pub fn connect(&self, endpoint: Endpoint) -> ScanResult<oneshot::Receiver<ScanResult<()>>> {
        self.guard("connect", SessionState::can_connect)?;
        let (request, rx) = SessionRequest::connect(endpoint);
        self.submit(request)?;
        Ok(rx)
    }

    /// Queue a disconnect.
    pub fn disconnect(&self) -> ScanResult<oneshot::Receiver<ScanResult<()>>> {
        self.guard("disconnect", SessionState::can_disconnect)?;
        let (request, rx) = SessionRequest::disconnect();
        self.submit(request)?;
        Ok(rx)
    }

    /// Queue a measurement with an immutable snapshot of the parameters.
    pub fn start_measurement(
        &self,
        params: MeasurementParameters,
    ) -> ScanResult<oneshot::Receiver<ScanResult<MeasurementReport>>> {
        self.guard("start a measurement", SessionState::can_start_measurement)?;
        let (request, rx) = SessionRequest::start_measurement(params);
        self.submit(request)?;
        Ok(rx)
    }

    /// Forward the latest parameters to the session's pending configuration.
    pub fn configure(&self, params: MeasurementParameters) -> ScanResult<oneshot::Receiver<()>> {
        let (request, rx) = SessionRequest::configure(params);
        self.submit(request)?;
        Ok(rx)
    }

    /// Ask the worker to release the instrument and stop.
    pub fn shutdown(&self) -> ScanResult<oneshot::Receiver<()>> {
        let (request, rx) = SessionRequest::shutdown();
        self.submit(request)?;
        Ok(rx)
    }

    /// A state that forbids `action` wins over the busy flag.
    fn guard(&self, action: &'static str, allowed: fn(&SessionState) -> bool) -> ScanResult<()> {
        let state = self.state();
        if !allowed(&state) {
            return Err(ScanError::InvalidState { action, state });
        }
        if self.is_busy() {
            return Err(ScanError::SessionBusy);
        }
        Ok(())
    }

    /// Exclusive requests claim the busy flag first; the worker releases it.
    fn submit(&self, request: SessionRequest) -> ScanResult<()> {
        let exclusive = request.is_exclusive();
        if exclusive
            && self
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(ScanError::SessionBusy);
        }
        let sent = match self.requests.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(request)) => {
                warn!(?request, "worker queue full");
                Err(ScanError::SessionBusy)
            }
            Err(TrySendError::Closed(_)) => Err(ScanError::WorkerStopped),
        };
        if sent.is_err() && exclusive {
            self.busy.store(false, Ordering::SeqCst);
        }
        sent
    }
}
