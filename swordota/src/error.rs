//! Error types for swordota.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::ota::AckStatus;

/// Result type for swordota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for swordota operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Input file does not exist. Checked before any read.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Plaintext handed to the cipher is not block aligned.
    #[error("Cipher input of {len} bytes is not a multiple of the {block_size}-byte block size")]
    CipherPrecondition {
        /// Length of the rejected buffer.
        len: usize,
        /// Cipher block size.
        block_size: usize,
    },

    /// Image does not fit the 16-bit address/size fields of a frame.
    #[error("Image of {len} bytes does not fit 16-bit frame fields")]
    ImageTooLarge {
        /// Length of the rejected image.
        len: usize,
    },

    /// Frame payload longer than one flash page.
    #[error("Frame payload of {len} bytes exceeds {max} bytes")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest payload a frame carries.
        max: usize,
    },

    /// Artifact length is not a whole number of frames.
    #[error("Artifact of {len} bytes is not a multiple of the {frame_size}-byte frame size")]
    ArtifactMisaligned {
        /// Artifact length.
        len: usize,
        /// Expected frame size.
        frame_size: usize,
    },

    /// The serial port could not be opened.
    #[error("Failed to open serial port {port}: {source}")]
    TransportOpen {
        /// Port name that failed to open.
        port: String,
        /// Underlying serial port error.
        #[source]
        source: serialport::Error,
    },

    /// The device rejected a block more often than the retry budget allows.
    #[error(
        "Device rejected block {block} ({status}) after {attempts} attempts at offset {offset}/{total}"
    )]
    ProtocolNack {
        /// Index of the rejected block.
        block: usize,
        /// Last status observed.
        status: AckStatus,
        /// Number of attempts made.
        attempts: u32,
        /// Byte offset of the rejected block.
        offset: usize,
        /// Total artifact size.
        total: usize,
    },

    /// An I/O fault happened on the port during the transfer.
    #[error("Transport I/O failure on block {block} at offset {offset}/{total}: {source}")]
    TransportIo {
        /// Index of the block in flight.
        block: usize,
        /// Byte offset of the block in flight.
        offset: usize,
        /// Total artifact size.
        total: usize,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The embedding application asked to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// I/O error (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
