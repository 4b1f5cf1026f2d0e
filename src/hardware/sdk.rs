//! Instrument SDK boundary
//!
//! The vendor SDK that talks to the microscope control server is an external
//! collaborator. This module defines the narrow surface the rest of the crate
//! needs from it, so the session state machine can drive either the real vendor
//! binding or the simulator in [`crate::hardware::mock`].
//!
//! - [`SnomSdk`]: entry point; opens a session on the control server.
//! - [`SdkSession`]: the live connection. Scan descriptions are built from a
//!   vendor template, then the scan is started, awaited and its channels read.
//!
//! # Contract
//!
//! - All methods are async (`#[async_trait]`) and thread-safe (`Send + Sync`)
//! - Errors are `anyhow::Result`; the session maps them onto its own error taxonomy
//! - `wait_for_scan` may block for hours; the SDK itself offers no timeout
//!
//! # Example
//!
//! ```rust,ignore
//! let session = sdk.connect(&endpoint).await?;
//! let template = session.spawn_default_scan_parameters().await?;
//! let scan = session.construct_scan(&ScanDescription::new(&template, &params)?).await?;
//! session.approach(0.8).await?;
//! session.scan(&scan).await?;
//! session.wait_for_scan(&scan).await?;
//! let amplitude = session.read_channel(&scan, "O2A").await?;
//! session.disconnect().await?;
//! ```

use crate::parameter::MeasurementParameters;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and how to reach the instrument control server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Control server host name
    pub host: String,
    /// Server certificate fingerprint
    pub fingerprint: String,
    /// Path to the vendor client library
    pub library_path: PathBuf,
}

/// Defaults handed out by the server for a new scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTemplate {
    /// Scan name prefix
    pub name: String,
    /// Channels the instrument records by default
    pub channels: Vec<String>,
}

/// Scanner area, in µm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanGeometry {
    pub center_x: f64,
    pub center_y: f64,
    pub size_x: f64,
    pub size_y: f64,
}

/// Interferometer mirror travel for spectral acquisition, in µm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterferometerRange {
    pub center: f64,
    pub distance: f64,
    pub points: u32,
    pub skipped_points: u32,
    pub start_position: f64,
    pub end_position: f64,
}

/// Everything the vendor needs to construct a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDescription {
    pub name: String,
    pub geometry: ScanGeometry,
    /// (pixels per line, lines)
    pub resolution: (u32, u32),
    /// Rotation in degrees
    pub angle: f64,
    /// Integration time per pixel, in ms
    pub sampling_time_ms: f64,
    pub interferometer: InterferometerRange,
    /// Channels to record
    pub channels: Vec<String>,
}

impl ScanDescription {
    /// Map every scan and interferometer parameter onto the vendor template.
    ///
    /// # Errors
    /// Fails when the parameters describe a scan the instrument cannot run:
    /// an empty scan area, or an empty channel list.
    pub fn new(template: &ScanTemplate, params: &MeasurementParameters) -> Result<Self> {
        let scan = &params.scan;
        let ifg = &params.interferometer;

        if scan.size_x <= 0.0 || scan.size_y <= 0.0 {
            bail!(
                "scan area must be larger than zero (got {} x {} µm)",
                scan.size_x,
                scan.size_y
            );
        }
        if template.channels.is_empty() {
            bail!("no channels selected for recording");
        }

        Ok(Self {
            name: template.name.clone(),
            geometry: ScanGeometry {
                center_x: scan.offset_x,
                center_y: scan.offset_y,
                size_x: scan.size_x,
                size_y: scan.size_y,
            },
            resolution: (scan.resolution_width, scan.resolution_height),
            angle: scan.angle,
            sampling_time_ms: scan.ms_per_pixel,
            interferometer: InterferometerRange {
                center: ifg.center,
                distance: ifg.distance,
                points: ifg.number_of_points,
                skipped_points: ifg.number_of_skipped_points,
                start_position: ifg.start_position,
                end_position: ifg.end_position,
            },
            channels: template.channels.clone(),
        })
    }

    /// Number of pixels in the scan.
    pub fn pixel_count(&self) -> usize {
        self.resolution.0 as usize * self.resolution.1 as usize
    }
}

/// Vendor-side handle to a constructed scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanHandle {
    /// Vendor identifier for the scan object
    pub id: u64,
    pub description: ScanDescription,
}

/// Capability: open a session on the instrument control server.
#[async_trait]
pub trait SnomSdk: Send + Sync {
    /// Driver name for logs
    fn name(&self) -> &str;

    /// Connect to the control server.
    ///
    /// # Returns
    /// - Ok(session) once the server accepted the client and shared definitions are loaded
    /// - Err on refusal, timeout or a missing client library
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn SdkSession>>;
}

/// A live connection to the instrument.
#[async_trait]
pub trait SdkSession: Send + Sync {
    /// Fresh scan template with the server defaults.
    async fn spawn_default_scan_parameters(&self) -> Result<ScanTemplate>;

    /// Build a vendor scan object.
    ///
    /// # Returns
    /// - Err if the server rejects the description
    async fn construct_scan(&self, description: &ScanDescription) -> Result<ScanHandle>;

    /// Approach the tip to the sample and engage feedback.
    ///
    /// # Arguments
    /// * `strength` - Approach setpoint, 0.0 to 1.0
    async fn approach(&self, strength: f64) -> Result<()>;

    /// Start a constructed scan (returns once the scan is running).
    async fn scan(&self, scan: &ScanHandle) -> Result<()>;

    /// Block until the running scan finishes.
    async fn wait_for_scan(&self, scan: &ScanHandle) -> Result<()>;

    /// Download one recorded channel.
    async fn read_channel(&self, scan: &ScanHandle, channel: &str) -> Result<Vec<f64>>;

    /// Close the connection and release the client library.
    async fn disconnect(&self) -> Result<()>;
}
