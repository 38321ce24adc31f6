//! swordota CLI - Command-line tool for Sword of Secrets OTA updates.
//!
//! ## Features
//!
//! - Generate encrypted update artifacts from raw firmware binaries
//! - Flash artifacts to the bootloader over a serial port
//! - Inspect artifacts offline against a model of the bootloader
//! - Environment variable and config file support

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use console::style;
use env_logger::Env;
use log::{debug, warn};
use swordota::OtaConfig;
use swordota::port::DEFAULT_PORT;

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors raised by the CLI itself, classified for the exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// The user cancelled the operation.
    #[error("{0}")]
    Cancelled(String),
}

/// swordota - Generate and flash encrypted OTA updates for the Sword of Secrets.
///
/// Environment variables:
///   SWORDOTA_PORT   - Default serial port
///   RUST_LOG        - Log filter (overrides -v/-q)
#[derive(Parser)]
#[command(name = "swordota")]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["generate", "flash", "inspect"])
))]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Build FILE.enc from the firmware binary FILE.
    #[arg(long)]
    generate: bool,

    /// Send the encrypted artifact FILE to the bootloader.
    #[arg(long)]
    flash: bool,

    /// Decrypt the artifact FILE and check every frame offline.
    #[arg(long)]
    inspect: bool,

    /// Firmware binary (--generate) or encrypted artifact (--flash, --inspect).
    #[arg(value_name = "FILE")]
    pub(crate) file: PathBuf,

    /// Serial port to use [default: /dev/ttyUSB0].
    #[arg(short, long, env = "SWORDOTA_PORT")]
    pub(crate) port: Option<String>,

    /// How long to wait for the status byte of a frame.
    #[arg(long, value_name = "MS")]
    pub(crate) ack_timeout: Option<u64>,

    /// Resends of a rejected frame before giving up.
    #[arg(long, value_name = "N")]
    pub(crate) retries: Option<u32>,

    /// Pause before resending a rejected frame.
    #[arg(long, value_name = "MS")]
    pub(crate) retry_delay: Option<u64>,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Print the inspection report as JSON to stdout.
    #[arg(long, conflicts_with_all = ["generate", "flash"])]
    pub(crate) json: bool,
}

/// Operation selected by the mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Generate,
    Flash,
    Inspect,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.generate {
            Mode::Generate
        } else if self.flash {
            Mode::Flash
        } else {
            Mode::Inspect
        }
    }

    /// Port from the command line, then the config file, then the default.
    pub(crate) fn port_name(&self, config: &Config) -> String {
        self.port
            .clone()
            .or_else(|| {
                config
                    .connection
                    .port
                    .clone()
            })
            .unwrap_or_else(|| DEFAULT_PORT.to_string())
    }

    /// Transfer options: command line over config file over defaults.
    pub(crate) fn ota_config(&self, config: &Config) -> OtaConfig {
        let mut ota = config.ota_config();
        if let Some(ms) = self.ack_timeout {
            ota.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = self.retries {
            ota.max_attempts = retries.saturating_add(1);
        }
        if let Some(ms) = self.retry_delay {
            ota.retry_delay = Duration::from_millis(ms);
        }
        ota
    }
}

/// Map an error to the process exit code.
///
/// 1 runtime failure, 3 missing input file, 130 interrupted.
fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<swordota::Error>() {
            return match lib_err {
                swordota::Error::FileNotFound(_) => 3,
                swordota::Error::Interrupted => 130,
                _ => 1,
            };
        }
    }
    1
}

fn init_logging(verbose: u8, quiet: bool) {
    let log_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(verbose >= 2)
        .format_timestamp(if verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match cli.mode() {
        Mode::Generate => commands::generate::cmd_generate(cli, &config),
        Mode::Flash => commands::flash::cmd_flash(cli, &config),
        Mode::Inspect => commands::inspect::cmd_inspect(cli, &config),
    }
}

fn main() {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(cli.verbose, cli.quiet);
    debug!(
        "swordota v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }
    swordota::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for_error(&err));
    }
}
