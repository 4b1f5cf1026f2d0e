//! Persisted scan settings.
//!
//! `settings.yaml` is a flat mapping whose keys are the scan and interferometer
//! field names:
//!
//! ```yaml
//! offset_x: 50.0
//! size_x: 1.0
//! resolution_width: 100
//! ms_per_pixel: 9.8
//! number_of_points: 600
//! ```
//!
//! Loading never blocks startup: an absent file or a document that does not
//! parse yields the compiled-in defaults, and keys missing from a partial
//! document keep their defaults. Bounds are enforced when the values are loaded
//! into a [`ParameterSet`](crate::parameter::ParameterSet).

use crate::error::ScanResult;
use crate::parameter::{InterferometerParameters, MeasurementParameters, ScanParameters};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlatSettings {
    #[serde(flatten)]
    scan: ScanParameters,
    #[serde(flatten)]
    interferometer: InterferometerParameters,
}

/// Load both parameter groups from `path`.
///
/// # Errors
/// Only on I/O failures other than a missing file.
pub fn load_settings(path: &Path) -> ScanResult<MeasurementParameters> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no saved settings, using defaults");
            return Ok(MeasurementParameters::default());
        }
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(MeasurementParameters::default());
    }

    match serde_yaml::from_str::<FlatSettings>(&content) {
        Ok(flat) => {
            info!(path = %path.display(), "settings loaded");
            Ok(MeasurementParameters::merge(flat.scan, flat.interferometer))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "settings file is malformed, using defaults");
            Ok(MeasurementParameters::default())
        }
    }
}

/// Write both parameter groups to `path`, creating parent directories.
pub fn save_settings(path: &Path, params: &MeasurementParameters) -> ScanResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let flat = FlatSettings {
        scan: params.scan.clone(),
        interferometer: params.interferometer.clone(),
    };
    fs::write(path, serde_yaml::to_string(&flat)?)?;
    info!(path = %path.display(), "settings saved");
    Ok(())
}
