//! Encryption at rest using AES-256-GCM.
//!
//! Every sealed file is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! The file's role inside the database directory is bound as associated
//! data, so a sealed record cannot be swapped for another file's record.
//!
//! Keys come from a key file holding exactly [`KEY_SIZE`] raw bytes and are
//! zeroized on drop.

use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::fs;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encryption key for AES-256-GCM.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Reads a key file.
    ///
    /// The file must contain exactly 32 raw bytes. Nothing is created or
    /// modified on disk.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let meta = fs::metadata(path).map_err(|e| {
            CoreError::auth(format!("cannot read key file {}: {e}", path.display()))
        })?;
        if meta.len() != KEY_SIZE as u64 {
            return Err(CoreError::invalid_key_size(
                usize::try_from(meta.len()).unwrap_or(usize::MAX),
                KEY_SIZE,
            ));
        }

        let bytes = Zeroizing::new(fs::read(path).map_err(|e| {
            CoreError::auth(format!("cannot read key file {}: {e}", path.display()))
        })?);
        Self::from_bytes(&bytes)
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens records with one key.
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Creates a new crypto manager with the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }

    /// Encrypts `plaintext`, binding `aad` as associated data.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CoreError::encryption_failed("encryption error"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    /// Decrypts a record produced by [`seal`](Self::seal) with the same `aad`.
    ///
    /// # Errors
    ///
    /// Fails on a wrong key, a different `aad` or corrupted data.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::decryption_failed("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[NONCE_SIZE..],
                    aad,
                },
            )
            .map_err(|_| CoreError::decryption_failed("wrong key or corrupted data"))
    }
}

impl std::fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoManager")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}
