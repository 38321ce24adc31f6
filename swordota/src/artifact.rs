//! Update artifact generation and loading.
//!
//! An artifact is the AES-CBC ciphertext of all frames of the update region,
//! stored next to the firmware as `<firmware>.enc`. It has no header of its
//! own.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::cipher::StreamCipher;
use crate::error::{Error, Result};
use crate::image::{START_OFFSET, TOTAL_SIZE, concat_frames, extract, frame_image};

/// Extension appended to the firmware file name.
pub const ARTIFACT_SUFFIX: &str = "enc";

/// Summary of a generated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    /// Where the artifact was written.
    pub path: PathBuf,
    /// Bytes taken from the firmware.
    pub region_len: usize,
    /// Number of frames.
    pub frames: usize,
    /// Artifact size in bytes.
    pub artifact_len: usize,
    /// Whether the self-test pattern was substituted.
    pub self_test: bool,
}

/// `firmware.bin` -> `firmware.bin.enc`.
pub fn artifact_path(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push(".");
    name.push(ARTIFACT_SUFFIX);
    PathBuf::from(name)
}

/// Frame `region` from [`START_OFFSET`] and encrypt the result.
pub fn build_artifact(region: &[u8], cipher: &StreamCipher) -> Result<Vec<u8>> {
    let frames = frame_image(region, START_OFFSET)?;
    let plaintext = concat_frames(&frames);
    debug!(
        "{} frames, {} bytes of plaintext",
        frames.len(),
        plaintext.len()
    );
    cipher.encrypt(&plaintext)
}

/// Build the artifact for `input` and write it next to it.
///
/// Nothing is written if the firmware cannot be read or framed.
pub fn generate(input: &Path, cipher: &StreamCipher) -> Result<Generated> {
    let region = extract::extract_region(input)?;
    let self_test = extract::is_self_test(input);
    let artifact = build_artifact(&region, cipher)?;

    let path = artifact_path(input);
    fs::write(&path, &artifact)?;
    info!("Generated {} ({} bytes)", path.display(), artifact.len());

    Ok(Generated {
        path,
        region_len: region.len(),
        frames: artifact.len() / TOTAL_SIZE,
        artifact_len: artifact.len(),
        self_test,
    })
}

/// Read an artifact and check that it holds whole frames.
pub fn load_artifact<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let data = fs::read(path)?;
    if data.len() % TOTAL_SIZE != 0 {
        return Err(Error::ArtifactMisaligned {
            len: data.len(),
            frame_size: TOTAL_SIZE,
        });
    }
    debug!("Loaded {} ({} frames)", path.display(), data.len() / TOTAL_SIZE);
    Ok(data)
}
