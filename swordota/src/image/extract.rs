//! Update region extraction.

use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::image::{END_OFFSET, START_OFFSET};

/// File name marker that selects the self-test pattern.
const SELF_TEST_MARKER: &str = "hello";

/// Length of the self-test pattern.
const SELF_TEST_LEN: usize = 256;

/// Read `path` and return the bytes of the update region.
///
/// If the path contains `hello`, the first 256 bytes of the region are
/// replaced by `0, 1, .., 255` so the bootloader can be checked against a
/// known vector.
pub fn extract_region<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let raw = fs::read(path)?;
    debug!("Read {} ({} bytes)", path.display(), raw.len());

    Ok(extract_from_bytes(&raw, is_self_test(path)))
}

/// Whether the path selects the self-test pattern.
///
/// The whole path is matched, directories included.
pub fn is_self_test(path: &Path) -> bool {
    path.to_string_lossy()
        .contains(SELF_TEST_MARKER)
}

/// Cut the update region out of an in-memory firmware image.
///
/// Files shorter than [`END_OFFSET`] yield a shorter (possibly empty) region.
pub fn extract_from_bytes(raw: &[u8], self_test: bool) -> Vec<u8> {
    if raw.len() < END_OFFSET {
        warn!(
            "Firmware is {} bytes, shorter than the update region end 0x{END_OFFSET:X}",
            raw.len()
        );
    }

    let start = START_OFFSET.min(raw.len());
    let end = END_OFFSET.min(raw.len());
    let mut region = raw[start..end].to_vec();

    if self_test {
        debug!("Substituting self-test pattern");
        for (i, b) in region
            .iter_mut()
            .take(SELF_TEST_LEN)
            .enumerate()
        {
            *b = i as u8;
        }
    }

    region
}
