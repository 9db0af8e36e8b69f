//! ossdock CLI - Command-line tool for Open Spectral Sensing data loggers.
//!
//! ## Features
//!
//! - Find devices on every serial port
//! - Full export and incremental sync of stored datapoints
//! - Device configuration (name, logging interval, sensor settings)
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use ossdock::{
    DeviceSession, NativePort, Opcode, ScanConfig, SerialConfig, TransferConfig,
    protocol::{
        BAUD_RATE, MAX_FRAME_AVG, MAX_INTEGRATION_TIME_MS, normalize_device_name,
        validate_calibration_factor, validate_logging_interval,
    },
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars should be drawn (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SelectOptions, select_device};

/// Failures that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Bad arguments or setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// ossdock - Dock Open Spectral Sensing data loggers over serial.
///
/// Environment variables:
///   OSSDOCK_PORT              - Serial port of the device
///   OSSDOCK_BAUD              - Baud rate (default: 921600)
///   OSSDOCK_TIMEOUT_MS        - Serial read timeout in milliseconds
///   OSSDOCK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "ossdock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the device (scanned if not specified).
    #[arg(short, long, global = true, env = "OSSDOCK_PORT")]
    port: Option<String>,

    /// Baud rate [default: 921600].
    #[arg(short, long, global = true, env = "OSSDOCK_BAUD")]
    baud: Option<u32>,

    /// Serial read timeout in milliseconds [default: 10000].
    #[arg(long, global = true, env = "OSSDOCK_TIMEOUT_MS", value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting or waiting for ports).
    #[arg(long, global = true, env = "OSSDOCK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Find devices on every serial port.
    Scan {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the status of a device.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send a command by name and print the raw answer.
    Invoke {
        /// Command name, e.g. GET_INFO or SET_COLLECTION_INTERVAL.
        #[arg(value_parser = parse_opcode)]
        name: Opcode,

        /// Command parameter.
        #[arg(allow_hyphen_values = true)]
        param: Option<String>,
    },

    /// Take a reading now.
    Capture {
        /// Write the reading as a CSV file with header.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Download every stored datapoint.
    Export {
        /// Output file (default: <data dir>/<device name>.CSV).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Erase device storage once the export has completed.
        #[arg(long)]
        erase: bool,
    },

    /// Append datapoints recorded since the last sync to the sync file.
    Sync,

    /// Rename the device (at most 12 characters).
    SetName {
        /// New device name.
        #[arg(value_parser = parse_device_name)]
        name: String,
    },

    /// Set the logging interval.
    SetInterval {
        /// Interval in milliseconds (at least 10000).
        #[arg(value_parser = parse_interval, value_name = "MS")]
        interval_ms: u32,
    },

    /// Set the sensor calibration factor.
    SetCalibration {
        /// Factor applied by the device to every reading.
        #[arg(value_parser = parse_calibration, allow_negative_numbers = true)]
        factor: f64,
    },

    /// Configure the spectral sensor.
    Configure {
        /// Let the sensor choose the integration time.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
        auto_exposure: bool,

        /// Frames averaged per reading.
        #[arg(
            long,
            default_value_t = 3,
            value_parser = clap::value_parser!(u8).range(1..=i64::from(MAX_FRAME_AVG))
        )]
        frame_avg: u8,

        /// Integration time in milliseconds, used without auto-exposure.
        #[arg(
            long = "int-time",
            value_name = "MS",
            default_value_t = 500,
            value_parser = clap::value_parser!(u16).range(1..=i64::from(MAX_INTEGRATION_TIME_MS))
        )]
        integration_time_ms: u16,
    },

    /// Start, stop or toggle scheduled recording.
    Record {
        /// What to do.
        #[arg(value_enum)]
        action: RecordAction,
    },

    /// Erase every datapoint stored on the device.
    Erase {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Reset the device.
    Reset,

    /// Show device firmware and storage information.
    Info,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Recording control.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum RecordAction {
    /// Start scheduled logging.
    Start,
    /// Stop scheduled logging.
    Stop,
    /// Flip between recording and paused.
    Toggle,
}

fn parse_opcode(s: &str) -> Result<Opcode, String> {
    let opcode = Opcode::from_name(s).map_err(|e| e.to_string())?;
    if matches!(opcode, Opcode::ExportAll | Opcode::SyncDatapoints) {
        return Err(format!(
            "{opcode} streams bulk data; use `ossdock export` or `ossdock sync`"
        ));
    }
    Ok(opcode)
}

fn parse_device_name(s: &str) -> Result<String, String> {
    normalize_device_name(s).map_err(|e| e.to_string())
}

fn parse_interval(s: &str) -> Result<u32, String> {
    let interval_ms: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("`{s}` is not a whole number of milliseconds"))?;
    validate_logging_interval(interval_ms).map_err(|e| e.to_string())?;
    Ok(interval_ms)
}

fn parse_calibration(s: &str) -> Result<f64, String> {
    let factor: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("`{s}` is not a number"))?;
    validate_calibration_factor(factor).map_err(|e| e.to_string())?;
    Ok(factor)
}

impl Cli {
    /// Serial settings from flags, environment and config, in that order.
    fn serial_config(&self, config: &Config) -> SerialConfig {
        let baud = self
            .baud
            .or(config.connection.baud)
            .unwrap_or(BAUD_RATE);
        let serial = SerialConfig::new("", baud);
        match self
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| config.serial_timeout())
        {
            Some(timeout) => serial.with_timeout(timeout),
            None => serial,
        }
    }

    fn scan_config(&self, config: &Config) -> ScanConfig {
        ScanConfig::default().with_serial(self.serial_config(config))
    }

    fn select_options(&self, config: &Config) -> SelectOptions {
        SelectOptions {
            port: self
                .port
                .clone()
                .or_else(|| {
                    config
                        .connection
                        .port
                        .clone()
                }),
            non_interactive: self.non_interactive,
        }
    }
}

fn transfer_config(config: &Config) -> TransferConfig {
    match config.idle_timeout() {
        Some(timeout) => TransferConfig::default().with_idle_timeout(timeout),
        None => TransferConfig::default(),
    }
}

/// Pick a device and connect to it.
fn open_session(cli: &Cli, config: &Config) -> Result<DeviceSession<NativePort>> {
    let scan = cli.scan_config(config);
    let device = select_device(&cli.select_options(config), &scan)?;
    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!("{} {device}", style("→").cyan());
    }
    let port = device
        .port
        .clone();
    DeviceSession::connect(device, &scan.serial, scan.link)
        .with_context(|| format!("Failed to connect to {port}"))
}

/// Exit code for an error: 2 usage, 130 cancelled, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    let lib_err = err
        .chain()
        .find_map(|e| e.downcast_ref::<ossdock::Error>());
    match lib_err {
        Some(ossdock::Error::InvalidArgument(_) | ossdock::Error::UnknownCommand(_)) => 2,
        Some(e) if is_interrupt(e) => 130,
        _ => 1,
    }
}

fn is_interrupt(err: &ossdock::Error) -> bool {
    match err {
        ossdock::Error::Interrupted => true,
        ossdock::Error::TransferAborted { source, .. } => is_interrupt(source),
        _ => false,
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C: do not wait for the current serial read
            std::process::exit(130);
        }
        eprintln!("\nInterrupted, stopping after the current step (Ctrl-C again to quit now)");
    });
    if let Err(e) = installed {
        debug!("Ctrl-C handler not installed: {e}");
    }
    ossdock::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Scan { json } => commands::scan::cmd_scan(cli, &config, *json),
        Commands::Status { json } => commands::device::cmd_status(cli, &config, *json),
        Commands::Invoke { name, param } => {
            commands::device::cmd_invoke(cli, &config, *name, param.as_deref())
        },
        Commands::Capture { output } => commands::device::cmd_capture(cli, &config, output.as_ref()),
        Commands::Export { output, erase } => {
            commands::transfer::cmd_export(cli, &config, output.as_ref(), *erase)
        },
        Commands::Sync => commands::transfer::cmd_sync(cli, &config),
        Commands::SetName { name } => commands::device::cmd_set_name(cli, &config, name),
        Commands::SetInterval { interval_ms } => {
            commands::device::cmd_set_interval(cli, &config, *interval_ms)
        },
        Commands::SetCalibration { factor } => {
            commands::device::cmd_set_calibration(cli, &config, *factor)
        },
        Commands::Configure {
            auto_exposure,
            frame_avg,
            integration_time_ms,
        } => commands::device::cmd_configure(
            cli,
            &config,
            ossdock::NspSettings {
                auto_exposure: *auto_exposure,
                frame_avg: *frame_avg,
                integration_time_ms: *integration_time_ms,
            },
        ),
        Commands::Record { action } => commands::device::cmd_record(cli, &config, *action),
        Commands::Erase { yes } => commands::device::cmd_erase(cli, &config, *yes),
        Commands::Reset => commands::device::cmd_reset(cli, &config),
        Commands::Info => commands::device::cmd_info(cli, &config),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "ossdock v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            let code = if was_interrupted() { 130 } else { exit_code(&err) };
            ExitCode::from(code)
        },
    }
}
