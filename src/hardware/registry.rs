//! Instrument kind registry
//!
//! Supported instruments form a closed set of [`InstrumentKind`] variants. Each
//! kind maps to a factory that builds the SDK binding for it, and lookup is an
//! explicit match on the kind named in the configuration.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use snom_scan::hardware::registry::{DriverRegistry, InstrumentKind};
//!
//! let mut registry = DriverRegistry::with_builtin();
//! registry.register(InstrumentKind::NeaSnom, || Arc::new(VendorSdk::load()));
//!
//! let sdk = registry.resolve(config.instrument)?;
//! ```

use crate::error::{ScanError, ScanResult};
use crate::hardware::mock::SimulatedSnom;
use crate::hardware::sdk::SnomSdk;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Instrument kinds known to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// neaSNOM control server reached through the vendor client library
    #[default]
    NeaSnom,
    /// In-process simulator
    Simulated,
}

impl InstrumentKind {
    /// Configuration name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::NeaSnom => "nea_snom",
            InstrumentKind::Simulated => "simulated",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type SdkFactory = Box<dyn Fn() -> Arc<dyn SnomSdk> + Send + Sync>;

/// Maps instrument kinds to SDK constructors.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<InstrumentKind, SdkFactory>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver this crate ships (the simulator).
    ///
    /// The vendor binding lives outside the crate and must be registered by the
    /// application that links it.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(InstrumentKind::Simulated, || {
            Arc::new(SimulatedSnom::new()) as Arc<dyn SnomSdk>
        });
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: InstrumentKind, factory: F)
    where
        F: Fn() -> Arc<dyn SnomSdk> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    /// Check if a kind has a factory
    pub fn contains(&self, kind: InstrumentKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Build the SDK binding for `kind`.
    ///
    /// # Errors
    /// [`ScanError::Configuration`] if no driver is registered for the kind.
    pub fn resolve(&self, kind: InstrumentKind) -> ScanResult<Arc<dyn SnomSdk>> {
        self.factories
            .get(&kind)
            .map(|factory| factory())
            .ok_or_else(|| {
                ScanError::Configuration(format!(
                    "no driver registered for instrument '{}'",
                    kind
                ))
            })
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("DriverRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_simulator() {
        let registry = DriverRegistry::with_builtin();
        assert!(registry.contains(InstrumentKind::Simulated));
        assert!(!registry.contains(InstrumentKind::NeaSnom));

        let sdk = registry.resolve(InstrumentKind::Simulated).unwrap();
        assert_eq!(sdk.name(), "simulated");
    }

    #[test]
    fn test_unregistered_kind_is_configuration_error() {
        let registry = DriverRegistry::with_builtin();
        let err = registry.resolve(InstrumentKind::NeaSnom).err().unwrap();
        assert!(matches!(err, ScanError::Configuration(_)));
        assert!(err.to_string().contains("nea_snom"));
    }

    #[test]
    fn test_register_replaces_factory() {
        let shared = SimulatedSnom::new();
        let mut registry = DriverRegistry::new();
        let handle = shared.clone();
        registry.register(InstrumentKind::NeaSnom, move || {
            Arc::new(handle.clone()) as Arc<dyn SnomSdk>
        });
        assert!(registry.resolve(InstrumentKind::NeaSnom).is_ok());
    }

    #[test]
    fn test_kind_names_match_config_values() {
        let kind: InstrumentKind = serde_yaml::from_str("simulated").unwrap();
        assert_eq!(kind, InstrumentKind::Simulated);
        let kind: InstrumentKind = serde_yaml::from_str("nea_snom").unwrap();
        assert_eq!(kind, InstrumentKind::NeaSnom);
        assert_eq!(InstrumentKind::default().to_string(), "nea_snom");
    }
}
