//! Database manifest.
//!
//! The manifest is the only metadata file stored in plain text. It records
//! the on-disk format version and whether the store is encrypted. For an
//! encrypted store it also carries a sealed key check used to reject a wrong
//! key before any other file is touched.

use crate::crypto::CryptoManager;
use crate::dir::{decode_hex, encode_hex};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

const KEY_CHECK: &[u8] = b"shoaldb key check";
const KEY_CHECK_AAD: &[u8] = b"manifest";

/// Database manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// On-disk format version.
    pub format_version: u16,
    /// Whether data files are sealed with AES-256-GCM.
    pub encrypted: bool,
    /// Hex-encoded sealed key check, present for encrypted stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_check: Option<String>,
}

impl Manifest {
    /// Creates the manifest for a new store.
    pub fn create(crypto: Option<&CryptoManager>) -> CoreResult<Self> {
        let key_check = match crypto {
            Some(crypto) => Some(encode_hex(&crypto.seal(KEY_CHECK, KEY_CHECK_AAD)?)),
            None => None,
        };
        Ok(Self {
            format_version: FORMAT_VERSION,
            encrypted: crypto.is_some(),
            key_check,
        })
    }

    /// Checks that the supplied key matches how the store was created.
    pub fn verify(&self, crypto: Option<&CryptoManager>) -> CoreResult<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }

        match (self.encrypted, crypto) {
            (false, None) => Ok(()),
            (false, Some(_)) => Err(CoreError::auth("database is not encrypted")),
            (true, None) => Err(CoreError::auth("database is encrypted; a key is required")),
            (true, Some(crypto)) => {
                let sealed = self
                    .key_check
                    .as_deref()
                    .and_then(decode_hex)
                    .ok_or_else(|| CoreError::invalid_format("manifest lacks a key check"))?;
                match crypto.open(&sealed, KEY_CHECK_AAD) {
                    Ok(plain) if plain == KEY_CHECK => Ok(()),
                    _ => Err(CoreError::auth("wrong encryption key")),
                }
            }
        }
    }

    /// Encodes the manifest.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes a manifest.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CoreError::invalid_format(format!("unreadable manifest: {e}")))
    }
}
