//! Simulated instrument
//!
//! Provides a stand-in for the vendor SDK so the session, worker and controller can
//! be exercised without a microscope. All waiting uses `tokio::time::sleep`, never
//! `std::thread::sleep`.
//!
//! Failures can be injected per stage through [`FailurePlan`], and call counters
//! record how often the instrument was touched.
//!
//! # Example
//!
//! ```
//! use snom_scan::hardware::{Endpoint, FailurePlan, SdkSession, SimulatedSnom, SnomSdk};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let snom = SimulatedSnom::with_scan_duration(Duration::from_millis(20));
//! let endpoint = Endpoint {
//!     host: "nea-server".into(),
//!     fingerprint: "00:11".into(),
//!     library_path: "/opt/neaspec/sdk".into(),
//! };
//!
//! snom.set_failures(FailurePlan { refuse_connection: true, ..Default::default() });
//! assert!(snom.connect(&endpoint).await.is_err());
//!
//! snom.set_failures(FailurePlan::default());
//! let session = snom.connect(&endpoint).await.unwrap();
//! session.disconnect().await.unwrap();
//! assert_eq!(snom.connect_count(), 2);
//! # });
//! ```

use crate::hardware::sdk::{Endpoint, ScanDescription, ScanHandle, ScanTemplate, SdkSession, SnomSdk};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

/// Channels the simulated instrument records by default.
pub const DEFAULT_CHANNELS: [&str; 7] = ["O0A", "O1A", "O2A", "O3A", "O4A", "M1A", "Z"];

/// Which stage of the simulated instrument should fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePlan {
    /// `connect` is refused
    pub refuse_connection: bool,
    /// `construct_scan` is rejected
    pub reject_scan: bool,
    /// `approach` fails
    pub fail_approach: bool,
    /// `wait_for_scan` fails part-way
    pub fail_during_scan: bool,
    /// `disconnect` fails
    pub fail_disconnect: bool,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    scans: AtomicUsize,
    approaches: AtomicUsize,
}

#[derive(Debug)]
struct Shared {
    failures: Mutex<FailurePlan>,
    counters: Counters,
    connected: AtomicBool,
    next_scan_id: AtomicU64,
    scan_duration: Duration,
    last_approach: Mutex<Option<f64>>,
}

impl Shared {
    fn failures(&self) -> FailurePlan {
        self.failures.lock().map(|plan| *plan).unwrap_or_default()
    }
}

/// Simulated near-field microscope.
///
/// Cloning yields another handle to the same simulated instrument, so a test can
/// keep one handle for inspection while the session owns another.
#[derive(Debug, Clone)]
pub struct SimulatedSnom {
    shared: Arc<Shared>,
}

impl SimulatedSnom {
    /// Create a simulator whose scans take 50 ms.
    pub fn new() -> Self {
        Self::with_scan_duration(Duration::from_millis(50))
    }

    /// Create a simulator with a custom scan duration.
    pub fn with_scan_duration(scan_duration: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                failures: Mutex::new(FailurePlan::default()),
                counters: Counters::default(),
                connected: AtomicBool::new(false),
                next_scan_id: AtomicU64::new(1),
                scan_duration,
                last_approach: Mutex::new(None),
            }),
        }
    }

    /// Replace the failure plan.
    pub fn set_failures(&self, plan: FailurePlan) {
        if let Ok(mut failures) = self.shared.failures.lock() {
            *failures = plan;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.shared.counters.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.shared.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn scan_count(&self) -> usize {
        self.shared.counters.scans.load(Ordering::SeqCst)
    }

    pub fn approach_count(&self) -> usize {
        self.shared.counters.approaches.load(Ordering::SeqCst)
    }

    /// Strength used by the most recent approach.
    pub fn last_approach_strength(&self) -> Option<f64> {
        self.shared.last_approach.lock().ok().and_then(|v| *v)
    }
}

impl Default for SimulatedSnom {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnomSdk for SimulatedSnom {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn SdkSession>> {
        self.shared.counters.connects.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(5)).await;

        if self.shared.failures().refuse_connection {
            bail!("Connection refused or timeout. Retry to connect again.");
        }
        if self.shared.connected.swap(true, Ordering::SeqCst) {
            bail!("a client is already connected to {}", endpoint.host);
        }

        info!(host = %endpoint.host, "simulated instrument connected");
        Ok(Box::new(SimulatedSession {
            shared: self.shared.clone(),
        }))
    }
}

struct SimulatedSession {
    shared: Arc<Shared>,
}

impl SimulatedSession {
    fn ensure_connected(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("session closed"))
        }
    }
}

#[async_trait]
impl SdkSession for SimulatedSession {
    async fn spawn_default_scan_parameters(&self) -> Result<ScanTemplate> {
        self.ensure_connected()?;
        Ok(ScanTemplate {
            name: "simulated_spectral_scan".into(),
            channels: DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect(),
        })
    }

    async fn construct_scan(&self, description: &ScanDescription) -> Result<ScanHandle> {
        self.ensure_connected()?;
        if self.shared.failures().reject_scan {
            bail!("server rejected scan '{}'", description.name);
        }
        let id = self.shared.next_scan_id.fetch_add(1, Ordering::SeqCst);
        debug!(id, pixels = description.pixel_count(), "simulated scan constructed");
        Ok(ScanHandle {
            id,
            description: description.clone(),
        })
    }

    async fn approach(&self, strength: f64) -> Result<()> {
        self.ensure_connected()?;
        self.shared.counters.approaches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.shared.last_approach.lock() {
            *last = Some(strength);
        }
        if self.shared.failures().fail_approach {
            bail!("approach failed: tip did not engage");
        }
        sleep(Duration::from_millis(5)).await;
        Ok(())
    }

    async fn scan(&self, scan: &ScanHandle) -> Result<()> {
        self.ensure_connected()?;
        self.shared.counters.scans.fetch_add(1, Ordering::SeqCst);
        debug!(id = scan.id, "simulated scan started");
        Ok(())
    }

    async fn wait_for_scan(&self, scan: &ScanHandle) -> Result<()> {
        self.ensure_connected()?;
        if self.shared.failures().fail_during_scan {
            sleep(self.shared.scan_duration / 2).await;
            bail!("scan {} aborted: feedback lost", scan.id);
        }
        sleep(self.shared.scan_duration).await;
        Ok(())
    }

    async fn read_channel(&self, scan: &ScanHandle, channel: &str) -> Result<Vec<f64>> {
        self.ensure_connected()?;
        if !scan.description.channels.iter().any(|c| c == channel) {
            bail!("channel '{}' was not recorded", channel);
        }
        let mut rng = rand::thread_rng();
        Ok((0..scan.description.pixel_count())
            .map(|_| rng.gen_range(0.0..1.0))
            .collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.shared.failures().fail_disconnect {
            bail!("server did not acknowledge disconnect");
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        info!("simulated instrument disconnected");
        Ok(())
    }
}
