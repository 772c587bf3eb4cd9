//! bleota CLI - Command-line tool for BLE firmware-over-the-air uploads.
//!
//! ## Features
//!
//! - Upload application or SPIFFS images with progress and Ctrl-C cancellation
//! - Dry runs against an in-process receiver
//! - Transfer plans (sector layout and CRCs) without a device
//! - Device scanning, Device Information Service and battery telemetry
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use bleota::{CancelToken, StatusKind};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod select;

use config::Config;

/// Classified CLI failures, mapped to exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration (exit code 3).
    #[error("{0}")]
    Config(String),
    /// No matching device (exit code 4).
    #[error("{0}")]
    DeviceNotFound(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<bleota::Error>() {
        Some(bleota::Error::Cancelled) => 130,
        Some(bleota::Error::DeviceNotFound(_)) => 4,
        Some(bleota::Error::InvalidConfig(_)) => 3,
        _ => 1,
    }
}

/// Whether the error is a user cancellation rather than a failure.
fn is_cancellation(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CliError>(), Some(CliError::Cancelled(_)))
        || err
            .downcast_ref::<bleota::Error>()
            .is_some_and(|e| e.status() == StatusKind::Neutral)
}

/// bleota - Firmware-over-the-air uploads for BLE devices.
///
/// Environment variables:
///   BLEOTA_DEVICE            - Default device name or address
///   BLEOTA_TIMEOUT_MS        - Acknowledgment timeout (default: 5000)
///   BLEOTA_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "bleota")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  bleota upload firmware.bin\n  bleota --device OTA-Sensor upload --kind spiffs spiffs.bin\n  bleota plan firmware.bin --json")]
pub(crate) struct Cli {
    /// Device name or address (auto-selected if not specified).
    #[arg(short, long, global = true, env = "BLEOTA_DEVICE", value_name = "NAME|ADDRESS")]
    device: Option<String>,

    /// How long to scan for devices, in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    scan_secs: Option<u64>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "BLEOTA_NON_INTERACTIVE")]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Image kinds accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Kind {
    /// Application firmware.
    App,
    /// SPIFFS filesystem image.
    Spiffs,
}

impl From<Kind> for bleota::OtaKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::App => Self::App,
            Kind::Spiffs => Self::Spiffs,
        }
    }
}

/// Arguments of the upload command.
#[derive(Args, Debug)]
pub(crate) struct UploadArgs {
    /// Image file to upload.
    file: PathBuf,

    /// Image kind.
    #[arg(long, value_enum)]
    kind: Option<Kind>,

    /// Acknowledgment timeout in milliseconds.
    #[arg(long, env = "BLEOTA_TIMEOUT_MS", value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Packet size cap in bytes, header included.
    #[arg(long, value_name = "BYTES")]
    packet_size: Option<usize>,

    /// Resend a timed-out command or sector up to N times.
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Upload to an in-process receiver instead of a device.
    #[arg(long)]
    dry_run: bool,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a firmware or filesystem image.
    Upload(UploadArgs),

    /// Show how an image would be split into sectors and packets.
    Plan {
        /// Image file.
        file: PathBuf,

        /// Packet size cap in bytes, header included.
        #[arg(long, default_value_t = bleota::protocol::packet::MAX_PACKET_SIZE)]
        packet_size: usize,

        /// Output the plan as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Scan for nearby BLE devices.
    Scan {
        /// Output the device list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read the Device Information Service of a device.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print battery telemetry notifications.
    Monitor {
        /// Stop after this many samples.
        #[arg(long, value_name = "N")]
        count: Option<usize>,
    },

    /// Compute the CRC-16/CCITT of hex-encoded bytes.
    Crc {
        /// Bytes as hex, separators allowed (e.g. "31 32 33" or "0x313233").
        hex: String,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (auto-detected if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

fn init_logging(cli: &Cli) {
    // Setup logging based on verbosity
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

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "bleota v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let (cancel, token) = bleota::cancel_pair();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
        debug!("Could not install Ctrl-C handler: {e}");
    }

    let code = match run(&cli, token) {
        Ok(()) => 0,
        Err(err) => {
            if is_cancellation(&err) {
                eprintln!("{} {err:#}", style("Cancelled:").yellow().bold());
            } else {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            exit_code(&err)
        },
    };
    std::process::exit(code);
}

fn run(cli: &Cli, cancel: CancelToken) -> Result<()> {
    if let Some(path) = cli.config_path.as_deref().filter(|p| !p.exists()) {
        return Err(CliError::Config(format!("config file not found: {}", path.display())).into());
    }
    let mut config = Config::load_with(cli.config_path.as_deref());

    match &cli.command {
        Commands::Plan {
            file,
            packet_size,
            json,
        } => commands::plan::cmd_plan(file, *packet_size, *json),
        Commands::Crc { hex } => commands::crc::cmd_crc(hex),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
        Commands::Upload(args) => block_on(commands::upload::cmd_upload(
            cli,
            &mut config,
            args,
            cancel,
        )),
        Commands::Scan { json } => block_on(commands::scan::cmd_scan(cli, &config, *json)),
        Commands::Info { json } => block_on(commands::info::cmd_info(cli, &mut config, *json)),
        Commands::Monitor { count } => block_on(commands::monitor::cmd_monitor(
            cli,
            &mut config,
            *count,
            cancel,
        )),
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(future)
}
