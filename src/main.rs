//! CLI entry point for snom-scan
//!
//! Provides command-line access to:
//! - the measurement duration estimate for the saved (or overridden) settings
//! - configuration checks
//! - a complete connect / measure / disconnect cycle
//!
//! # Usage
//!
//! ```bash
//! snom-scan estimate --settings settings.yaml --set resolution_width=200
//! snom-scan check-config --config config.yaml
//! snom-scan measure --set size_x=2.5 --assume-yes
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use snom_scan::config::{InstrumentConfig, DEFAULT_CONFIG_PATH};
use snom_scan::controller::{Controller, Frontend, OfflineDecision};
use snom_scan::estimator::TimeEstimator;
use snom_scan::hardware::DriverRegistry;
use snom_scan::logging::{self, OutputFormat, TracingConfig};
use snom_scan::parameter::{
    InterferometerParameters, MeasurementParameters, ParameterSet, ScanParameters,
};
use snom_scan::session::SessionState;
use snom_scan::settings::{load_settings, save_settings};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(name = "snom-scan")]
#[command(about = "SNOM scan parameters, duration estimate and measurement control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Settings file (overrides `settings_path` from the configuration)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the estimated measurement duration
    Estimate {
        /// Override a parameter, e.g. `--set size_x=2.5`
        #[arg(long = "set", value_parser = parse_assignment)]
        overrides: Vec<(String, String)>,

        /// Write the resulting parameters back to the settings file
        #[arg(long)]
        save: bool,
    },

    /// Load and validate the configuration
    CheckConfig,

    /// Connect, run one measurement and disconnect
    Measure {
        /// Override a parameter, e.g. `--set size_x=2.5`
        #[arg(long = "set", value_parser = parse_assignment)]
        overrides: Vec<(String, String)>,

        /// Answer yes to the offline-mode question instead of prompting
        #[arg(long)]
        assume_yes: bool,
    },
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", s)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = InstrumentConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(settings) = cli.settings {
        config.settings_path = settings;
    }
    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    let _guard = logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Estimate { overrides, save } => estimate(&config, &overrides, save),
        Commands::CheckConfig => check_config(&config),
        Commands::Measure {
            overrides,
            assume_yes,
        } => measure(config, &overrides, assume_yes),
    }
}

fn estimate(config: &InstrumentConfig, overrides: &[(String, String)], save: bool) -> Result<()> {
    let saved = load_settings(&config.settings_path)?;
    let mut scan = ParameterSet::<ScanParameters>::new();
    let mut interferometer = ParameterSet::<InterferometerParameters>::new();
    scan.load(&saved.scan)?;
    interferometer.load(&saved.interferometer)?;

    for (name, value) in overrides {
        if scan.input(name).is_some() {
            scan.set_text(name, value)?;
            scan.commit(name)?;
        } else {
            interferometer.set_text(name, value)?;
            interferometer.commit(name)?;
        }
    }

    let mut estimator = TimeEstimator::new();
    estimator.update(Some(&scan.snapshot()), Some(&interferometer.snapshot()));
    println!("{}", estimator.display());

    if save {
        let params = MeasurementParameters::merge(scan.snapshot(), interferometer.snapshot());
        save_settings(&config.settings_path, &params)?;
    }
    Ok(())
}

fn check_config(config: &InstrumentConfig) -> Result<()> {
    config.validate()?;
    println!("instrument:    {}", config.instrument);
    println!("host:          {}", config.host);
    println!("data_dir:      {}", config.data_dir.display());
    println!("settings_path: {}", config.settings_path.display());
    if config.is_configured() {
        println!("SDK:           configured");
    } else {
        println!("SDK:           not configured (offline mode only)");
    }
    Ok(())
}

fn measure(config: InstrumentConfig, overrides: &[(String, String)], assume_yes: bool) -> Result<()> {
    config.validate()?;
    let registry = DriverRegistry::with_builtin();
    let mut controller = Controller::new(config, &registry, ConsoleFrontend { assume_yes })?;

    for (name, value) in overrides {
        if !controller.edit_text(name, value)? {
            bail!("'{}' is not a valid entry for {}", value, name);
        }
        controller.commit(name)?;
    }

    controller.toggle_connection()?;
    if controller.is_offline() {
        println!("Estimated duration: {}", controller.estimate());
        controller.shutdown();
        return Ok(());
    }
    wait_for_outcome(&mut controller);
    if controller.state() != SessionState::Connected {
        controller.shutdown();
        bail!("could not connect to the instrument");
    }

    info!(estimate = controller.estimate(), "starting measurement");
    controller.start_measurement()?;
    wait_for_outcome(&mut controller);

    controller.toggle_connection()?;
    wait_for_outcome(&mut controller);
    controller.request_exit();
    Ok(())
}

/// Poll until the in-flight operation reports back.
fn wait_for_outcome<F: Frontend>(controller: &mut Controller<F>) {
    let mut idle_polls = 0;
    loop {
        if controller.poll() > 0 {
            return;
        }
        if !controller.is_busy() {
            idle_polls += 1;
            if idle_polls > 50 {
                return;
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Line-oriented frontend on stdout/stdin.
struct ConsoleFrontend {
    assume_yes: bool,
}

impl Frontend for ConsoleFrontend {
    fn show_estimate(&mut self, text: &str) {
        println!("Estimated duration: {}", text);
    }

    fn set_connected(&mut self, connected: bool) {
        println!("Instrument: {}", if connected { "connected" } else { "disconnected" });
    }

    fn set_measure_enabled(&mut self, _enabled: bool) {}

    fn show_error(&mut self, message: &str, recoverable: bool) {
        if recoverable {
            eprintln!("warning: {}", message);
        } else {
            eprintln!("error: {}", message);
        }
    }

    fn show_notice(&mut self, message: &str) {
        println!("{}", message);
    }

    fn ask_offline_mode(&mut self, reason: &str) -> OfflineDecision {
        if self.assume_yes {
            return OfflineDecision::Continue;
        }
        print!("{} [y/N] ", reason);
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) if answer.trim().eq_ignore_ascii_case("y") => OfflineDecision::Continue,
            _ => OfflineDecision::Abort,
        }
    }

    fn confirm_exit(&mut self) -> bool {
        true
    }
}
