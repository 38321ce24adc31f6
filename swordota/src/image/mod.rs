//! Firmware image handling.
//!
//! The update region of the device flash is `[START_OFFSET, END_OFFSET)`.
//! Images are cut into 64-byte chunks, each wrapped in a frame:
//!
//! ```text
//! +-------+------+------+-------+-------------+---------+
//! | MAGIC | ADDR | SIZE | CKSUM | DATA (64)   | PAD (8) |
//! +-------+------+------+-------+-------------+---------+
//! |   2   |  2   |  2   |   2   |     64      |    8    |
//! +-------+------+------+-------+-------------+---------+
//! ```
//!
//! All header fields are little-endian. Pad bytes carry the pad length.

pub mod extract;
pub mod frame;

use crate::cipher::BLOCK_SIZE;

/// First flash offset of the update region.
pub const START_OFFSET: usize = 0x1000;

/// End (exclusive) of the update region.
pub const END_OFFSET: usize = 0x4000;

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Payload bytes per frame (one flash page).
pub const CHUNK_SIZE: usize = 64;

/// Pad bytes appended to every frame so it is cipher block aligned.
pub const PAD_SIZE: usize = BLOCK_SIZE - (HEADER_SIZE + CHUNK_SIZE) % BLOCK_SIZE;

/// Total size of one frame on the wire.
pub const TOTAL_SIZE: usize = HEADER_SIZE + CHUNK_SIZE + PAD_SIZE;

/// Frame magic.
pub const OTA_MAGIC: u16 = 0x1337;

pub use extract::{extract_from_bytes, extract_region};
pub use frame::{Frame, FrameHeader, checksum16, concat_frames, frame_image};
