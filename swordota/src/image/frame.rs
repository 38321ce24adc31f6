//! OTA frame construction.

use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::image::{CHUNK_SIZE, HEADER_SIZE, OTA_MAGIC, TOTAL_SIZE};

/// Byte offset of the checksum field inside a frame.
const CKSUM_OFFSET: usize = 6;

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Magic, always [`OTA_MAGIC`] for frames built here.
    pub magic: u16,
    /// Absolute flash address of the payload.
    pub addr: u16,
    /// Length of the whole extracted image, repeated in every frame.
    pub size: u16,
    /// Checksum over the frame with this field zeroed.
    pub cksum: u16,
}

impl FrameHeader {
    /// Read a header from the first [`HEADER_SIZE`] bytes of `raw`.
    pub fn read(raw: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(raw);
        Ok(Self {
            magic: reader.read_u16::<LittleEndian>()?,
            addr: reader.read_u16::<LittleEndian>()?,
            size: reader.read_u16::<LittleEndian>()?,
            cksum: reader.read_u16::<LittleEndian>()?,
        })
    }

    /// Serialize the header.
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        LittleEndian::write_u16(&mut raw[0..2], self.magic);
        LittleEndian::write_u16(&mut raw[2..4], self.addr);
        LittleEndian::write_u16(&mut raw[4..6], self.size);
        LittleEndian::write_u16(&mut raw[CKSUM_OFFSET..], self.cksum);
        raw
    }
}

/// One addressed, checksummed, padded chunk of firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Payload, at most [`CHUNK_SIZE`] bytes.
    pub data: Vec<u8>,
}

impl Frame {
    /// Build a frame and finalize its checksum.
    ///
    /// Payloads longer than [`CHUNK_SIZE`] are rejected.
    pub fn new(addr: u16, size: u16, data: &[u8]) -> Result<Self> {
        if data.len() > CHUNK_SIZE {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: CHUNK_SIZE,
            });
        }

        let mut frame = Self {
            header: FrameHeader {
                magic: OTA_MAGIC,
                addr,
                size,
                cksum: 0,
            },
            data: data.to_vec(),
        };
        frame.header.cksum = checksum16(&frame.to_bytes());
        Ok(frame)
    }

    /// Number of pad bytes; also the value of every pad byte.
    pub fn pad_len(&self) -> usize {
        TOTAL_SIZE - HEADER_SIZE - self.data.len()
    }

    /// Serialize to exactly [`TOTAL_SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TOTAL_SIZE);
        self.write_to(&mut out);
        out
    }

    /// Append the serialized frame to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.data);
        let pad = self.pad_len();
        out.extend(std::iter::repeat_n(pad as u8, pad));
    }

    /// Parse a frame the way the bootloader does: full payload, pad ignored.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE + CHUNK_SIZE {
            return Err(Error::ArtifactMisaligned {
                len: raw.len(),
                frame_size: TOTAL_SIZE,
            });
        }
        Ok(Self {
            header: FrameHeader::read(raw)?,
            data: raw[HEADER_SIZE..HEADER_SIZE + CHUNK_SIZE].to_vec(),
        })
    }

    /// Recompute the checksum of a serialized frame and compare it to the
    /// stored one.
    pub fn verify_checksum(raw: &[u8]) -> bool {
        if raw.len() < HEADER_SIZE {
            return false;
        }
        let stored = LittleEndian::read_u16(&raw[CKSUM_OFFSET..]);
        let mut zeroed = raw.to_vec();
        zeroed[CKSUM_OFFSET..CKSUM_OFFSET + 2].fill(0);
        checksum16(&zeroed) == stored
    }
}

/// 16-bit ones'-complement style sum of little-endian words.
///
/// Words are summed into a 32-bit accumulator whose upper half is folded
/// back in twice. A trailing odd byte counts as the low byte of a word.
pub fn checksum16(data: &[u8]) -> u16 {
    let mut sum = data.chunks(2).fold(0u32, |acc, word| {
        let word = match *word {
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            [lo] => u16::from(lo),
            _ => 0,
        };
        acc.wrapping_add(u32::from(word))
    });
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum as u16
}

/// Cut `image` into frames addressed from `start_addr`.
///
/// Produces `ceil(image.len() / CHUNK_SIZE)` frames. The last one may carry
/// a short payload and a correspondingly longer pad.
pub fn frame_image(image: &[u8], start_addr: usize) -> Result<Vec<Frame>> {
    let too_large = || Error::ImageTooLarge { len: image.len() };
    let size = u16::try_from(image.len()).map_err(|_| too_large())?;

    image
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let addr = u16::try_from(start_addr + i * CHUNK_SIZE).map_err(|_| too_large())?;
            Frame::new(addr, size, chunk)
        })
        .collect()
}

/// Concatenate serialized frames in order.
pub fn concat_frames(frames: &[Frame]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames.len() * TOTAL_SIZE);
    for frame in frames {
        frame.write_to(&mut out);
    }
    out
}
