//! # swordota
//!
//! A library for building and flashing encrypted OTA updates for the Sword
//! of Secrets bootloader.
//!
//! This crate provides:
//!
//! - Update region extraction from raw firmware binaries
//! - Frame construction (magic, address, size, 16-bit checksum, self-describing pad)
//! - AES-128-CBC encryption of the frame stream under a fixed key and zero IV
//! - The block-by-block serial transfer protocol with bounded retries
//! - A host-side model of the bootloader for offline artifact inspection
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use swordota::{CipherKey, OtaClient, OtaConfig, StreamCipher};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cipher = StreamCipher::new(&CipherKey::default());
//!     let generated = swordota::artifact::generate(Path::new("firmware.bin"), &cipher)?;
//!
//!     let artifact = swordota::artifact::load_artifact(&generated.path)?;
//!     let mut client = OtaClient::open("/dev/ttyUSB0", OtaConfig::default())?;
//!     client.flash(&artifact, |done, total| {
//!         println!("Flashing: {done}/{total}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod artifact;
pub mod bootloader;
pub mod cipher;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by the transfer loop.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
pub use {
    artifact::{Generated, artifact_path, generate, load_artifact},
    bootloader::{Bootloader, FrameReport, inspect},
    cipher::{CipherKey, StreamCipher},
    error::{Error, Result},
    image::{Frame, FrameHeader, TOTAL_SIZE},
    port::{NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::ota::{AckStatus, FlashState, OtaClient, OtaConfig, TransferSession},
};
