//! Measurement data writer.
//!
//! Each run is written as one CSV file in the data directory, named
//! `<YYYYmmdd_HHMMSS>_<run-id>.csv`. The file starts with the run metadata as
//! `#`-commented pretty JSON, followed by a header row of channel names and one
//! row per sample index.
use crate::error::{ScanError, ScanResult};
use crate::parameter::MeasurementParameters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Metadata written at the top of every data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    /// Instrument the data came from
    pub instrument: String,
    pub parameters: MeasurementParameters,
}

/// Summary of a completed measurement, handed back to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementReport {
    pub run_id: Uuid,
    pub path: PathBuf,
    pub samples_per_channel: usize,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// Writes acquired channel data to CSV.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    data_dir: PathBuf,
}

impl CsvWriter {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Write one run. `channels` pairs each channel name with its samples; shorter
    /// channels leave their trailing cells empty.
    pub fn write(
        &self,
        metadata: &RunMetadata,
        channels: &[(String, Vec<f64>)],
    ) -> ScanResult<MeasurementReport> {
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir)?;
        }
        let file_name = format!(
            "{}_{}.csv",
            metadata.started.format("%Y%m%d_%H%M%S"),
            metadata.run_id
        );
        let path = self.data_dir.join(file_name);

        let mut file = File::create(&path)
            .map_err(|e| ScanError::Storage(format!("Failed to create CSV file: {}", e)))?;
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        for line in json.lines() {
            writeln!(file, "# {}", line)?;
        }

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(channels.iter().map(|(name, _)| name.as_str()))?;

        let samples = channels.iter().map(|(_, data)| data.len()).max().unwrap_or(0);
        for index in 0..samples {
            let row = channels.iter().map(|(_, data)| {
                data.get(index).map(|v| v.to_string()).unwrap_or_default()
            });
            writer.write_record(row)?;
        }
        writer.flush()?;

        info!(path = %path.display(), samples, "measurement data written");
        Ok(MeasurementReport {
            run_id: metadata.run_id,
            path,
            samples_per_channel: samples,
            started: metadata.started,
            finished: metadata.finished,
        })
    }
}

/// Read back the metadata block of a data file.
pub fn read_metadata(path: &Path) -> ScanResult<RunMetadata> {
    let content = fs::read_to_string(path)?;
    let json: String = content
        .lines()
        .map_while(|line| line.strip_prefix("# "))
        .collect::<Vec<_>>()
        .join("\n");
    serde_json::from_str(&json).map_err(|e| ScanError::Storage(e.to_string()))
}
