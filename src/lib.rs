//! # SNOM Scan Control Library
//!
//! Parameter editing, duration estimation and measurement control for a
//! scanning near-field optical microscope with an interferometer. The library
//! keeps the operator surface and the instrument apart: parameters are edited
//! and estimated on the caller's thread, while every SDK call runs on a
//! dedicated worker thread.
//!
//! ## Crate Structure
//!
//! - **`validation`**: Numeric input probing and range helpers shared by fields and config.
//! - **`field`**: Validated input fields (`NumericField`, `IntegerStepper`).
//! - **`parameter`**: Parameter groups, their field layouts and the observable `ParameterSet`.
//! - **`estimator`**: Measurement duration estimate and its `H:MM:SS` display.
//! - **`hardware`**: The `SnomSdk` abstraction, the simulated instrument and the driver registry.
//! - **`session`**: `InstrumentSession` state machine (connect, measure, disconnect).
//! - **`storage`**: CSV output of downloaded channels with run metadata.
//! - **`messages`**: Requests to and events from the instrument worker.
//! - **`worker`**: The `instrument-worker` thread and its `SessionHandle`.
//! - **`controller`**: Wires edits, the estimate and the worker to a `Frontend`.
//! - **`config`**: Figment-based `config.yaml` loading with environment overrides.
//! - **`settings`**: `settings.yaml` persistence of both parameter groups.
//! - **`logging`**: Tracing subscriber setup.
//! - **`error`**: The crate-wide `ScanError`.

pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod field;
pub mod hardware;
pub mod logging;
pub mod messages;
pub mod parameter;
pub mod session;
pub mod settings;
pub mod storage;
pub mod validation;
pub mod worker;

pub use controller::{Controller, Frontend, OfflineDecision};
pub use error::{ScanError, ScanResult};
pub use parameter::{InterferometerParameters, MeasurementParameters, ParameterSet, ScanParameters};
pub use session::{InstrumentSession, SessionState};
