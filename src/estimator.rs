//! Acquisition time estimate.
//!
//! Every pixel of the scan records a full interferogram, and the tip travels each
//! line in both directions, so the total time is
//!
//! ```text
//! resolution_width * resolution_height * number_of_points * (ms_per_pixel / 1000) * 2
//! ```
//!
//! seconds. Fractional seconds are rounded half up, and the result is rendered as
//! `H:MM:SS` with unbounded hours (`117600 s` → `32:40:00`).

use crate::parameter::{InterferometerParameters, ParamMap, ParameterGroup, ScanParameters};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Text shown when no estimate can be made.
pub const UNKNOWN_DISPLAY: &str = "unknown";

/// Outcome of an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimate {
    /// Duration rounded to whole seconds.
    Known(Duration),
    /// One of the parameter sets is absent or lacks a required field.
    Unknown,
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimate::Known(duration) => f.write_str(&format_hms(duration.as_secs())),
            Estimate::Unknown => f.write_str(UNKNOWN_DISPLAY),
        }
    }
}

/// Estimate the measurement duration from both parameter sets.
pub fn estimate(
    scan: Option<&ScanParameters>,
    interferometer: Option<&InterferometerParameters>,
) -> Estimate {
    match (scan, interferometer) {
        (Some(scan), Some(ifg)) => estimate_from_values(&scan.to_values(), &ifg.to_values()),
        _ => Estimate::Unknown,
    }
}

/// Estimate from name → value views; any missing or empty required field gives
/// [`Estimate::Unknown`].
pub fn estimate_from_values(scan: &ParamMap, interferometer: &ParamMap) -> Estimate {
    let lookup = |map: &ParamMap, key: &str| map.get(key).and_then(|v| v.as_f64());

    let (Some(width), Some(height), Some(ms_per_pixel), Some(points)) = (
        lookup(scan, "resolution_width"),
        lookup(scan, "resolution_height"),
        lookup(scan, "ms_per_pixel"),
        lookup(interferometer, "number_of_points"),
    ) else {
        return Estimate::Unknown;
    };

    let total_seconds = width * height * points * (ms_per_pixel / 1000.0) * 2.0;
    if !total_seconds.is_finite() || total_seconds < 0.0 {
        return Estimate::Unknown;
    }
    Estimate::Known(Duration::from_secs(round_half_up(total_seconds)))
}

fn round_half_up(seconds: f64) -> u64 {
    (seconds + 0.5).floor() as u64
}

/// Render whole seconds as `H:MM:SS`.
pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Keeps the displayed estimate in sync with parameter changes.
#[derive(Debug, Default)]
pub struct TimeEstimator {
    last_display: Option<String>,
}

impl TimeEstimator {
    /// Estimator with nothing displayed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the estimate. Returns the new display text when it differs from
    /// what was shown before.
    pub fn update(
        &mut self,
        scan: Option<&ScanParameters>,
        interferometer: Option<&InterferometerParameters>,
    ) -> Option<&str> {
        let text = estimate(scan, interferometer).to_string();
        if self.last_display.as_deref() == Some(text.as_str()) {
            return None;
        }
        trace!(estimate = %text, "estimate changed");
        self.last_display = Some(text);
        self.last_display.as_deref()
    }

    /// Text currently displayed.
    pub fn display(&self) -> &str {
        self.last_display.as_deref().unwrap_or(UNKNOWN_DISPLAY)
    }
}
