//! Root key used to mint and verify macaroons.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::LsatError;

/// Length of a generated root key in bytes.
pub const ROOT_KEY_SIZE: usize = 32;

/// The process-wide secret that signs every macaroon.
///
/// Load it once at startup and keep it for the lifetime of the process.
/// Replacing it invalidates every token issued under the old key; there is
/// no rotation scheme.
///
/// # Example
///
/// ```
/// use lsat_paywall::RootKey;
///
/// let key = RootKey::generate();
/// let restored = RootKey::from_hex(&key.to_hex()).unwrap();
/// assert_eq!(key, restored);
///
/// // Debug output never reveals the secret
/// assert!(!format!("{key:?}").contains(&key.to_hex()));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct RootKey {
    bytes: Vec<u8>,
}

impl RootKey {
    /// Generates a new random 32-byte root key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; ROOT_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a root key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidKeyFormat` if `bytes` is empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LsatError> {
        if bytes.is_empty() {
            return Err(LsatError::InvalidKeyFormat {
                reason: "root key must not be empty".to_string(),
            });
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Creates a root key from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidKeyFormat` if the string is not valid hex
    /// or decodes to zero bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self, LsatError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|e| LsatError::InvalidKeyFormat {
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Derives a subkey for `label` as HMAC-SHA256(self, label).
    ///
    /// Macaroons signed under different labels never verify under each
    /// other's key.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidKeyFormat` if the HMAC cannot be keyed.
    pub fn derive(&self, label: &str) -> Result<Self, LsatError> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.bytes).map_err(|e| LsatError::InvalidKeyFormat {
                reason: e.to_string(),
            })?;
        mac.update(label.as_bytes());
        Ok(Self {
            bytes: mac.finalize().into_bytes().to_vec(),
        })
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the key as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
