//! Instrument configuration using Figment
//!
//! Configuration is loaded from:
//! 1. compiled-in defaults (placeholder SDK settings)
//! 2. `config.yaml` (if present)
//! 3. environment variables prefixed with `SNOM_SCAN_`
//!
//! Keys are flat, so the environment prefix is not split on `_`:
//! `SNOM_SCAN_PATH_TO_DLL=/opt/nea/sdk` overrides `path_to_dll`.
//!
//! A missing file yields the placeholder configuration, which the session treats
//! as "not configured" and the controller answers with the offline-mode choice.
//!
//! # Example
//! ```no_run
//! use snom_scan::config::InstrumentConfig;
//!
//! let config = InstrumentConfig::load_from("config.yaml")?;
//! if !config.is_configured() {
//!     println!("running offline");
//! }
//! # Ok::<(), snom_scan::error::ScanError>(())
//! ```

use crate::error::{ScanError, ScanResult};
use crate::hardware::registry::InstrumentKind;
use crate::hardware::sdk::Endpoint;
use crate::logging::parse_log_level;
use crate::session::{SessionOptions, DEFAULT_APPROACH_STRENGTH};
use crate::validation::{is_in_range, is_not_empty, is_valid_path};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sentinel marking an SDK field that still needs to be filled in.
pub const PLACEHOLDER: &str = "CHANGEMEE";

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "SNOM_SCAN_";

/// Whether an SDK setting is unset.
pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == PLACEHOLDER
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Path to the vendor client library
    pub path_to_dll: String,
    /// Server certificate fingerprint
    pub fingerprint: String,
    /// Control server host
    #[serde(default = "default_host")]
    pub host: String,
    /// Which driver to use
    #[serde(default)]
    pub instrument: InstrumentKind,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output directory for measurement files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Persisted scan settings
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    /// Approach setpoint, 0 < strength <= 1
    #[serde(default = "default_approach_strength")]
    pub approach_strength: f64,
    /// Give up waiting for a scan after this many seconds (absent = wait forever)
    #[serde(default)]
    pub scan_timeout_secs: Option<u64>,
    /// Channels to download after a scan (empty = instrument defaults)
    #[serde(default)]
    pub channels: Vec<String>,
}

// Default value functions
fn default_host() -> String {
    "nea-server".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("settings.yaml")
}

fn default_approach_strength() -> f64 {
    DEFAULT_APPROACH_STRENGTH
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            path_to_dll: PLACEHOLDER.to_string(),
            fingerprint: PLACEHOLDER.to_string(),
            host: default_host(),
            instrument: InstrumentKind::default(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            settings_path: default_settings_path(),
            approach_strength: default_approach_strength(),
            scan_timeout_secs: None,
            channels: Vec::new(),
        }
    }
}

impl InstrumentConfig {
    /// Load configuration from `config.yaml` and environment variables
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(InstrumentConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScanResult<()> {
        parse_log_level(&self.log_level).map_err(ScanError::Configuration)?;

        if self.approach_strength <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "Invalid approach_strength {}. Must be greater than 0",
                self.approach_strength
            )));
        }
        is_in_range(self.approach_strength, 0.0..=1.0).map_err(|e| {
            ScanError::Configuration(format!(
                "Invalid approach_strength {}: {}",
                self.approach_strength, e
            ))
        })?;

        if !is_placeholder(&self.path_to_dll) {
            is_valid_path(&self.path_to_dll)
                .map_err(|e| ScanError::Configuration(format!("Invalid path_to_dll: {}", e)))?;
        }
        is_not_empty(&self.host)
            .map_err(|e| ScanError::Configuration(format!("Invalid host: {}", e)))?;

        if self.scan_timeout_secs == Some(0) {
            return Err(ScanError::Configuration(
                "scan_timeout_secs must be at least 1; omit it to wait indefinitely".into(),
            ));
        }

        if self.channels.iter().any(|c| c.trim().is_empty()) {
            return Err(ScanError::Configuration("channel names must not be empty".into()));
        }

        Ok(())
    }

    /// Both SDK settings have real values.
    pub fn is_configured(&self) -> bool {
        !is_placeholder(&self.path_to_dll) && !is_placeholder(&self.fingerprint)
    }

    /// Connection parameters for the SDK.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            fingerprint: self.fingerprint.clone(),
            library_path: PathBuf::from(&self.path_to_dll),
        }
    }

    /// Measurement options for the session.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            approach_strength: self.approach_strength,
            scan_timeout: self.scan_timeout_secs.map(Duration::from_secs),
            channels: self.channels.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_gives_placeholder_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = InstrumentConfig::load_from(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.path_to_dll, PLACEHOLDER);
        assert_eq!(config.fingerprint, PLACEHOLDER);
        assert!(!config.is_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_config() {
        let file = write_yaml(
            "path_to_dll: /opt/neaspec/sdk\n\
             fingerprint: 'ab:cd:ef'\n\
             host: snom-lab\n\
             instrument: simulated\n\
             approach_strength: 0.5\n\
             scan_timeout_secs: 7200\n\
             channels: [O2A, Z]\n",
        );
        let config = InstrumentConfig::load_from(file.path()).unwrap();
        assert!(config.is_configured());
        assert_eq!(config.host, "snom-lab");
        assert_eq!(config.instrument, InstrumentKind::Simulated);
        assert_eq!(config.log_level, "info");

        let options = config.session_options();
        assert_eq!(options.approach_strength, 0.5);
        assert_eq!(options.scan_timeout, Some(Duration::from_secs(7200)));
        assert_eq!(options.channels, vec!["O2A", "Z"]);

        let endpoint = config.endpoint();
        assert_eq!(endpoint.library_path, PathBuf::from("/opt/neaspec/sdk"));
    }

    #[test]
    fn test_one_placeholder_is_enough_to_be_unconfigured() {
        let file = write_yaml("path_to_dll: /opt/sdk\nfingerprint: CHANGEMEE\n");
        let config = InstrumentConfig::load_from(file.path()).unwrap();
        assert!(!config.is_configured());

        let config = InstrumentConfig {
            path_to_dll: "  ".into(),
            fingerprint: "ab".into(),
            ..InstrumentConfig::default()
        };
        assert!(!config.is_configured());
    }

    #[test]
    fn test_config_validation() {
        let mut config = InstrumentConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "verbose".into();
        assert!(config.validate().is_err());

        config.log_level = "debug".into();
        config.approach_strength = 1.5;
        assert!(config.validate().is_err());

        config.approach_strength = 0.0;
        assert!(config.validate().is_err());

        config.approach_strength = 1.0;
        config.scan_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = write_yaml("path_to_dll: [unterminated\n");
        let err = InstrumentConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "path_to_dll: /opt/sdk\nfingerprint: ab\n")?;
            jail.set_env("SNOM_SCAN_HOST", "override-host");
            let config = InstrumentConfig::load_from("config.yaml").map_err(|e| e.to_string())?;
            assert_eq!(config.host, "override-host");
            assert_eq!(config.path_to_dll, "/opt/sdk");
            Ok(())
        });
    }
}
