//! Host-side model of the bootloader receive path.
//!
//! The bootloader decrypts every incoming frame with a CBC context that is
//! never reset during an update, then checks in order: magic, checksum,
//! address below the update window, address past the window. The first
//! failed check picks the status byte; a frame that passes is written to
//! flash and answered with `V`.
//!
//! [`inspect`] runs a whole artifact through this model offline.

use log::trace;

use crate::cipher::{CbcDecryptor, CipherKey, StreamCipher};
use crate::error::{Error, Result};
use crate::image::{CHUNK_SIZE, END_OFFSET, Frame, FrameHeader, OTA_MAGIC, START_OFFSET, TOTAL_SIZE};
use crate::protocol::ota::AckStatus;

/// Value of erased flash.
const ERASED: u8 = 0xFF;

/// Outcome of one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    /// Position of the frame in the artifact.
    pub index: usize,
    /// Decrypted header.
    pub header: FrameHeader,
    /// Status byte the device answers with.
    pub status: AckStatus,
}

/// Device flash contents, `[0, END_OFFSET)`.
#[derive(Debug, Clone)]
pub struct FlashImage {
    data: Vec<u8>,
}

impl FlashImage {
    fn erased() -> Self {
        Self {
            data: vec![ERASED; END_OFFSET],
        }
    }

    /// Bytes of the update window.
    pub fn region(&self) -> &[u8] {
        &self.data[START_OFFSET..END_OFFSET]
    }

    /// Whole flash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn write_page(&mut self, addr: usize, page: &[u8]) {
        self.data[addr..addr + page.len()].copy_from_slice(page);
    }
}

/// Bootloader model.
pub struct Bootloader {
    decryptor: CbcDecryptor,
    flash: FlashImage,
    received: usize,
}

impl Bootloader {
    /// Model a device provisioned with `key`, flash erased.
    pub fn new(key: &CipherKey) -> Self {
        Self {
            decryptor: StreamCipher::new(key).decryptor(),
            flash: FlashImage::erased(),
            received: 0,
        }
    }

    /// Flash contents so far.
    pub fn flash(&self) -> &FlashImage {
        &self.flash
    }

    /// Process one encrypted frame.
    pub fn receive(&mut self, block: &[u8]) -> Result<FrameReport> {
        if block.len() != TOTAL_SIZE {
            return Err(Error::ArtifactMisaligned {
                len: block.len(),
                frame_size: TOTAL_SIZE,
            });
        }

        let mut raw = block.to_vec();
        self.decryptor.decrypt_in_place(&mut raw)?;
        let frame = Frame::parse(&raw)?;
        let addr = usize::from(frame.header.addr);

        let status = if frame.header.magic != OTA_MAGIC {
            AckStatus::BadMagic
        } else if !Frame::verify_checksum(&raw) {
            AckStatus::BadChecksum
        } else if addr < START_OFFSET {
            AckStatus::BelowWindow
        } else if addr >= END_OFFSET {
            AckStatus::BeyondWindow
        } else {
            // Page writes near the end of flash are clipped.
            let len = CHUNK_SIZE.min(END_OFFSET - addr);
            self.flash
                .write_page(addr, &frame.data[..len]);
            AckStatus::Written
        };

        let index = self.received;
        self.received += 1;
        trace!("Frame {index} @ 0x{addr:04X}: {status}");

        Ok(FrameReport {
            index,
            header: frame.header,
            status,
        })
    }
}

/// Decrypt and validate every frame of an artifact.
pub fn inspect(key: &CipherKey, ciphertext: &[u8]) -> Result<Vec<FrameReport>> {
    if ciphertext.len() % TOTAL_SIZE != 0 {
        return Err(Error::ArtifactMisaligned {
            len: ciphertext.len(),
            frame_size: TOTAL_SIZE,
        });
    }

    let mut bootloader = Bootloader::new(key);
    ciphertext
        .chunks(TOTAL_SIZE)
        .map(|block| bootloader.receive(block))
        .collect()
}
