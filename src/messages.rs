//! Message types for the instrument worker.
//!
//! The UI thread never touches the [`InstrumentSession`](crate::session::InstrumentSession)
//! directly. It sends a [`SessionRequest`] to the worker, which owns the session,
//! and gets the outcome back twice: on the oneshot embedded in the request, for a
//! caller that wants to await it, and as a [`SessionEvent`] for the controller's
//! event pump.
//!
//! # Message Flow
//!
//! ```text
//! UI Thread                          Worker Thread
//! ---------                          -------------
//! 1. Create request with oneshot
//! 2. try_send via mpsc       ------>
//!                                    3. Receive request
//!                                    4. Drive the session
//!                                    5. Send response + event
//! 6. poll() drains events    <------
//! ```
//!
//! Each request variant has a helper that builds the request and returns the
//! oneshot receiver:
//!
//! ```rust,ignore
//! let (request, rx) = SessionRequest::connect(endpoint);
//! // tx.send(request).await?;
//! // let result = rx.await?;
//! ```

use crate::error::ScanResult;
use crate::hardware::sdk::Endpoint;
use crate::parameter::MeasurementParameters;
use crate::storage::MeasurementReport;
use std::fmt;
use tokio::sync::oneshot;

/// Requests handled by the [`SessionWorker`](crate::worker::SessionWorker).
#[derive(Debug)]
pub enum SessionRequest {
    /// Connect to the instrument server.
    ///
    /// # Response
    ///
    /// - `Ok(())`: the session is `Connected`
    /// - `Err(ScanError)`: configuration, connection or state error; the session is
    ///   `Disconnected`
    Connect {
        endpoint: Endpoint,
        response: oneshot::Sender<ScanResult<()>>,
    },

    /// Release the instrument. A no-op when already disconnected.
    Disconnect {
        response: oneshot::Sender<ScanResult<()>>,
    },

    /// Replace the session's pending configuration.
    ///
    /// # Response
    ///
    /// Always succeeds.
    Configure {
        params: MeasurementParameters,
        response: oneshot::Sender<()>,
    },

    /// Run one measurement with an immutable parameter snapshot.
    ///
    /// # Response
    ///
    /// - `Ok(report)`: data was acquired and written
    /// - `Err(ScanError)`: state, configuration or runtime failure; the session is
    ///   `Connected` again if it was before
    StartMeasurement {
        params: MeasurementParameters,
        response: oneshot::Sender<ScanResult<MeasurementReport>>,
    },

    /// Release the instrument (best effort) and stop the worker.
    Shutdown { response: oneshot::Sender<()> },
}

impl SessionRequest {
    /// Helper to create a Connect request
    pub fn connect(endpoint: Endpoint) -> (Self, oneshot::Receiver<ScanResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Connect {
                endpoint,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Disconnect request
    pub fn disconnect() -> (Self, oneshot::Receiver<ScanResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Disconnect { response: tx }, rx)
    }

    /// Helper to create a Configure request
    pub fn configure(params: MeasurementParameters) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Configure {
                params,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a StartMeasurement request
    pub fn start_measurement(
        params: MeasurementParameters,
    ) -> (Self, oneshot::Receiver<ScanResult<MeasurementReport>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::StartMeasurement {
                params,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Shutdown request
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }

    /// Whether this request occupies the session until it completes.
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Disconnect { .. } | Self::StartMeasurement { .. }
        )
    }
}

/// Session operation a [`SessionEvent::Failed`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Connect,
    Disconnect,
    Measure,
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionAction::Connect => write!(f, "connect"),
            SessionAction::Disconnect => write!(f, "disconnect"),
            SessionAction::Measure => write!(f, "measure"),
        }
    }
}

/// Outcomes published by the worker for the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    MeasurementFinished(MeasurementReport),
    Failed {
        action: SessionAction,
        message: String,
        /// Whether the operator can simply retry
        recoverable: bool,
    },
}
