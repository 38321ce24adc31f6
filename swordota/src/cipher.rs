//! AES-128-CBC over the concatenated frame stream.
//!
//! The whole update is encrypted as one chained operation under a fixed key
//! and an all-zero IV, so identical firmware always yields an identical
//! artifact. The bootloader decrypts block by block and carries the IV from
//! one frame to the next; [`CbcDecryptor`] models that.

use std::fmt;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::error::{Error, Result};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// AES-128 key length in bytes.
pub const KEY_SIZE: usize = 16;

/// Development key baked into the bootloader build.
pub const DEFAULT_KEY: [u8; KEY_SIZE] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];

/// AES-128 key material.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey([u8; KEY_SIZE]);

impl CipherKey {
    /// Wrap raw key bytes.
    pub const fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Build a key from a byte slice, e.g. the contents of a key file.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = raw.try_into().map_err(|_| {
            Error::Config(format!(
                "key must be exactly {KEY_SIZE} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Default for CipherKey {
    fn default() -> Self {
        Self(DEFAULT_KEY)
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

fn check_aligned(len: usize) -> Result<()> {
    if len % BLOCK_SIZE != 0 {
        return Err(Error::CipherPrecondition {
            len,
            block_size: BLOCK_SIZE,
        });
    }
    Ok(())
}

fn xor_in_place(block: &mut [u8], other: &[u8; BLOCK_SIZE]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}

/// CBC encryption of an update stream with a zero IV.
#[derive(Clone)]
pub struct StreamCipher {
    aes: Aes128,
    iv: [u8; BLOCK_SIZE],
}

impl StreamCipher {
    /// Create a cipher for `key` with an all-zero IV.
    pub fn new(key: &CipherKey) -> Self {
        Self {
            aes: Aes128::new(GenericArray::from_slice(key.as_bytes())),
            iv: [0u8; BLOCK_SIZE],
        }
    }

    /// Encrypt `plaintext` as one chained operation.
    ///
    /// The input must be a whole number of blocks; it is never padded or
    /// truncated here.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        check_aligned(plaintext.len())?;

        let mut out = plaintext.to_vec();
        let mut prev = self.iv;
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            xor_in_place(block, &prev);
            self.aes.encrypt_block(block.into());
            prev.copy_from_slice(block);
        }
        Ok(out)
    }

    /// Decrypt a whole artifact from the start of the chain.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut out = ciphertext.to_vec();
        self.decryptor()
            .decrypt_in_place(&mut out)?;
        Ok(out)
    }

    /// Start a block-by-block decryption at the beginning of the chain.
    pub fn decryptor(&self) -> CbcDecryptor {
        CbcDecryptor {
            aes: self.aes.clone(),
            iv: self.iv,
        }
    }
}

/// CBC decryption that keeps its IV across calls.
#[derive(Clone)]
pub struct CbcDecryptor {
    aes: Aes128,
    iv: [u8; BLOCK_SIZE],
}

impl CbcDecryptor {
    /// Decrypt `buf` in place, continuing the chain from the previous call.
    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        check_aligned(buf.len())?;

        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            let mut next_iv = [0u8; BLOCK_SIZE];
            next_iv.copy_from_slice(block);
            self.aes.decrypt_block(block.into());
            xor_in_place(block, &self.iv);
            self.iv = next_iv;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FIPS-197 appendix C.1
    const FIPS_PLAINTEXT: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];
    const FIPS_CIPHERTEXT: [u8; 16] = [
        0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4, 0xc5,
        0x5a,
    ];

    #[test]
    fn test_first_block_is_plain_aes() {
        let cipher = StreamCipher::new(&CipherKey::default());
        assert_eq!(cipher.encrypt(&FIPS_PLAINTEXT).unwrap(), FIPS_CIPHERTEXT);
    }

    #[test]
    fn test_blocks_are_chained() {
        let cipher = StreamCipher::new(&CipherKey::default());
        let mut plaintext = FIPS_PLAINTEXT.to_vec();
        plaintext.extend_from_slice(&FIPS_PLAINTEXT);

        let ciphertext = cipher.encrypt(&plaintext).unwrap();
        assert_eq!(&ciphertext[..16], &FIPS_CIPHERTEXT);
        assert_ne!(&ciphertext[16..], &FIPS_CIPHERTEXT);

        // C2 = E(P2 ^ C1)
        let mut chained = FIPS_PLAINTEXT;
        xor_in_place(&mut chained, &FIPS_CIPHERTEXT);
        assert_eq!(cipher.encrypt(&chained).unwrap(), &ciphertext[16..]);
    }

    #[test]
    fn test_encrypt_is_deterministic() {
        let plaintext: Vec<u8> = (0..15360).map(|i| (i % 251) as u8).collect();
        let a = StreamCipher::new(&CipherKey::default()).encrypt(&plaintext).unwrap();
        let b = StreamCipher::new(&CipherKey::default()).encrypt(&plaintext).unwrap();
        assert_eq!(a.len(), plaintext.len());
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_changes_output() {
        let plaintext = [0u8; 32];
        let a = StreamCipher::new(&CipherKey::default()).encrypt(&plaintext).unwrap();
        let b = StreamCipher::new(&CipherKey::new([0x42; KEY_SIZE]))
            .encrypt(&plaintext)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unaligned_input_rejected() {
        let cipher = StreamCipher::new(&CipherKey::default());
        let err = cipher.encrypt(&[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            Error::CipherPrecondition {
                len: 17,
                block_size: BLOCK_SIZE
            }
        ));
        assert!(cipher.decryptor().decrypt_in_place(&mut [0u8; 5]).is_err());
    }

    #[test]
    fn test_decrypt_round_trip() {
        let cipher = StreamCipher::new(&CipherKey::default());
        let plaintext: Vec<u8> = (0..160).map(|i| i as u8).collect();
        let ciphertext = cipher.encrypt(&plaintext).unwrap();
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_decryptor_carries_iv_between_calls() {
        let cipher = StreamCipher::new(&CipherKey::default());
        let plaintext: Vec<u8> = (0..160).map(|i| (i * 3) as u8).collect();
        let ciphertext = cipher.encrypt(&plaintext).unwrap();

        let mut decryptor = cipher.decryptor();
        let mut first = ciphertext[..80].to_vec();
        let mut second = ciphertext[80..].to_vec();
        decryptor.decrypt_in_place(&mut first).unwrap();
        decryptor.decrypt_in_place(&mut second).unwrap();
        assert_eq!(first, &plaintext[..80]);
        assert_eq!(second, &plaintext[80..]);
    }

    #[test]
    fn test_key_from_bytes() {
        assert_eq!(
            CipherKey::from_bytes(&DEFAULT_KEY).unwrap(),
            CipherKey::default()
        );
        assert!(matches!(
            CipherKey::from_bytes(&[0u8; 15]),
            Err(Error::Config(_))
        ));
        assert_eq!(format!("{:?}", CipherKey::default()), "CipherKey(..)");
    }
}
