//! `--inspect`: decrypt an artifact and check it frame by frame.

use {
    anyhow::{Context, Result, bail},
    console::style,
    swordota::{AckStatus, FrameReport, TOTAL_SIZE},
};

use crate::Cli;
use crate::config::Config;

/// Status byte as a printable string, `-` when there is none.
fn status_code(status: AckStatus) -> String {
    match status.as_byte() {
        Some(b) if b.is_ascii_graphic() => char::from(b).to_string(),
        Some(b) => format!("0x{b:02X}"),
        None => "-".to_string(),
    }
}

fn report_json(report: &FrameReport) -> serde_json::Value {
    serde_json::json!({
        "index": report.index,
        "offset": report.index * TOTAL_SIZE,
        "magic": report.header.magic,
        "addr": report.header.addr,
        "size": report.header.size,
        "cksum": report.header.cksum,
        "status": status_code(report.status),
        "written": report.status.is_ack(),
    })
}

/// Inspect command implementation.
pub(crate) fn cmd_inspect(cli: &Cli, config: &Config) -> Result<()> {
    let key = config.cipher_key()?;
    let artifact = swordota::load_artifact(&cli.file)
        .with_context(|| format!("Failed to load artifact {}", cli.file.display()))?;
    let reports = swordota::inspect(&key, &artifact)
        .with_context(|| format!("Failed to inspect {}", cli.file.display()))?;
    let accepted = reports
        .iter()
        .filter(|r| r.status.is_ack())
        .count();

    if cli.json {
        let frames: Vec<serde_json::Value> = reports
            .iter()
            .map(report_json)
            .collect();
        let output = serde_json::json!({
            "ok": accepted == reports.len(),
            "data": {
                "file": cli.file.display().to_string(),
                "bytes": artifact.len(),
                "frames": reports.len(),
                "accepted": accepted,
                "reports": frames,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "{}",
            style(format!("Artifact: {}", cli.file.display()))
                .bold()
                .underlined()
        );
        println!("  Size:   {} bytes", artifact.len());
        println!("  Frames: {}", reports.len());
        println!();
        println!(
            "  {:<6} {:<8} {:<7} {:<7} {:<7} {:<7} Status",
            "Frame", "Offset", "Magic", "Addr", "Size", "Cksum"
        );
        for report in &reports {
            let status = if report.status.is_ack() {
                style(report.status.to_string()).green()
            } else {
                style(format!("{} ({})", report.status, status_code(report.status))).red()
            };
            println!(
                "  {:<6} {:<8} 0x{:04X}  0x{:04X}  {:<7} 0x{:04X}  {}",
                report.index,
                report.index * TOTAL_SIZE,
                report.header.magic,
                report.header.addr,
                report.header.size,
                report.header.cksum,
                status
            );
        }
        println!();
        println!("  {accepted}/{} frames accepted", reports.len());
    }

    if accepted != reports.len() {
        bail!(
            "{} of {} frames would be rejected by the bootloader",
            reports.len() - accepted,
            reports.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(AckStatus::Written), "V");
        assert_eq!(status_code(AckStatus::BadChecksum), "C");
        assert_eq!(status_code(AckStatus::Unknown(0)), "0x00");
        assert_eq!(status_code(AckStatus::NoAck), "-");
    }
}
