//! `--generate`: firmware binary to encrypted artifact.

use anyhow::{Context, Result};
use console::style;
use swordota::StreamCipher;
use swordota::image::{END_OFFSET, START_OFFSET};

use crate::Cli;
use crate::config::Config;

/// Generate command implementation.
pub(crate) fn cmd_generate(cli: &Cli, config: &Config) -> Result<()> {
    let key = config.cipher_key()?;
    let cipher = StreamCipher::new(&key);

    if !cli.quiet {
        eprintln!(
            "{} Reading {} (0x{START_OFFSET:04X}..0x{END_OFFSET:04X})",
            style("📦").cyan(),
            cli.file.display()
        );
    }

    let generated = swordota::generate(&cli.file, &cipher)
        .with_context(|| format!("Failed to generate update from {}", cli.file.display()))?;

    if !cli.quiet {
        if generated.self_test {
            eprintln!(
                "{} Self-test pattern substituted for the first 256 bytes",
                style("ℹ").blue()
            );
        }
        eprintln!(
            "{} {} frames, {} bytes -> {}",
            style("✓").green(),
            generated.frames,
            generated.artifact_len,
            style(generated.path.display()).bold()
        );
    }

    Ok(())
}
