//! `--flash`: send an artifact to the bootloader.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use swordota::port::DEFAULT_BAUD;
use swordota::{NativePortEnumerator, OtaClient, PortEnumerator, TOTAL_SIZE};

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Print the ports that can be opened, as a hint after an open failure.
fn print_available_ports() {
    match NativePortEnumerator::list_ports() {
        Ok(ports) if ports.is_empty() => {
            eprintln!("  {}", style("No serial ports found").dim());
        },
        Ok(ports) => {
            eprintln!("  Available ports:");
            for port in ports {
                let product = port
                    .product
                    .as_deref()
                    .unwrap_or("");
                let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                    format!(" ({vid:04X}:{pid:04X})")
                } else {
                    String::new()
                };
                eprintln!(
                    "    {} {}{} {}",
                    style("•").dim(),
                    style(&port.name).green(),
                    vid_pid,
                    style(product).dim()
                );
            }
        },
        Err(e) => debug!("Port enumeration failed: {e}"),
    }
}

fn progress_bar(cli: &Cli, total: usize) -> Result<ProgressBar> {
    if cli.quiet || !use_fancy_output() {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )?
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    Ok(pb)
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config) -> Result<()> {
    let artifact = swordota::load_artifact(&cli.file)
        .with_context(|| format!("Failed to load artifact {}", cli.file.display()))?;
    let frames = artifact.len() / TOTAL_SIZE;

    if !cli.quiet {
        eprintln!(
            "{} {} ({} frames, {} bytes)",
            style("📦").cyan(),
            cli.file.display(),
            frames,
            artifact.len()
        );
    }

    let port = cli.port_name(config);
    let ota = cli.ota_config(config);
    debug!(
        "ack timeout {:?}, {} attempts per frame, retry delay {:?}",
        ota.ack_timeout, ota.max_attempts, ota.retry_delay
    );
    ensure_not_interrupted()?;

    let mut client = match OtaClient::open(&port, ota) {
        Ok(client) => client,
        Err(err) => {
            if !cli.quiet {
                print_available_ports();
            }
            return Err(err).with_context(|| format!("Cannot open {port}"));
        },
    };
    if !cli.quiet {
        eprintln!(
            "{} Using port {} @ {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            DEFAULT_BAUD
        );
    }

    let pb = progress_bar(cli, artifact.len())?;
    let result = client.flash(&artifact, |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
        pb.set_message(format!("frame {}/{frames}", done / TOTAL_SIZE));
    });

    match result {
        Ok(()) => {
            pb.finish_and_clear();
            if !cli.quiet {
                eprintln!(
                    "\n{} {}",
                    style("🎉").green().bold(),
                    style("Update flashed").green().bold()
                );
            }
            Ok(())
        },
        Err(err) => {
            pb.abandon();
            let session = client.session();
            eprintln!(
                "{} Transfer aborted at offset {}/{}",
                style("✗").red(),
                session.offset,
                session.total
            );
            Err(err.into())
        },
    }
}
