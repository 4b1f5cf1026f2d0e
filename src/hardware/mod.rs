//! Instrument hardware layer
//!
//! - [`sdk`]: boundary traits for the vendor SDK
//! - [`mock`]: simulated instrument for tests and offline demos
//! - [`registry`]: instrument kind → driver lookup

pub mod mock;
pub mod registry;
pub mod sdk;

pub use mock::{FailurePlan, SimulatedSnom};
pub use registry::{DriverRegistry, InstrumentKind};
pub use sdk::{Endpoint, ScanDescription, ScanHandle, ScanTemplate, SdkSession, SnomSdk};
