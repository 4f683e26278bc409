//! Binary identifier embedded in every LSAT macaroon.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::constants::{IDENTIFIER_V0_LENGTH, PAYMENT_HASH_SIZE, TOKEN_ID_SIZE};
use crate::error::LsatError;

/// Identifier codec versions.
///
/// The version tag is written as a big-endian `u16` ahead of the payload,
/// and decoding dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IdentifierVersion {
    /// Payment hash followed by token id, 32 bytes each.
    V0,
}

impl IdentifierVersion {
    /// The newest version; used for all freshly minted identifiers.
    pub const LATEST: Self = Self::V0;

    /// Returns the wire tag for this version.
    #[must_use]
    pub const fn tag(self) -> u16 {
        match self {
            Self::V0 => 0,
        }
    }

    /// Looks up a version by its wire tag.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::UnknownVersion` for unrecognized tags.
    pub const fn from_tag(tag: u16) -> Result<Self, LsatError> {
        match tag {
            0 => Ok(Self::V0),
            version => Err(LsatError::UnknownVersion { version }),
        }
    }
}

/// The unique identity of an LSAT.
///
/// Binds the token to the invoice that pays for it (via the payment hash)
/// and distinguishes tokens minted for the same invoice (via the token id).
///
/// # Example
///
/// ```
/// use lsat_paywall::Identifier;
///
/// let id = Identifier::new(&[1u8; 32], &[2u8; 32]).unwrap();
/// let bytes = id.encode();
///
/// assert_eq!(bytes.len(), 66);
/// assert_eq!(Identifier::decode(&bytes).unwrap(), id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    version: IdentifierVersion,
    payment_hash: [u8; PAYMENT_HASH_SIZE],
    token_id: [u8; TOKEN_ID_SIZE],
}

impl Identifier {
    /// Creates a latest-version identifier.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::SizeMismatch` if either field is not 32 bytes.
    pub fn new(payment_hash: &[u8], token_id: &[u8]) -> Result<Self, LsatError> {
        Ok(Self {
            version: IdentifierVersion::LATEST,
            payment_hash: fixed(payment_hash, "payment hash")?,
            token_id: fixed(token_id, "token id")?,
        })
    }

    /// Creates an identifier with a random token id.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::SizeMismatch` if `payment_hash` is not 32 bytes.
    pub fn generate(payment_hash: &[u8]) -> Result<Self, LsatError> {
        let token_id: [u8; TOKEN_ID_SIZE] = rand::random();
        Self::new(payment_hash, &token_id)
    }

    /// Creates an identifier from a hex-encoded payment hash, as returned
    /// by invoice providers.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidHex` if the hash is not valid hex, or
    /// `LsatError::SizeMismatch` if it does not decode to 32 bytes.
    pub fn generate_for_hash_hex(payment_hash: &str) -> Result<Self, LsatError> {
        let bytes = decode_hex("payment hash", payment_hash)?;
        Self::generate(&bytes)
    }

    /// Returns the codec version.
    #[must_use]
    pub const fn version(&self) -> IdentifierVersion {
        self.version
    }

    /// Returns the payment hash.
    #[must_use]
    pub const fn payment_hash(&self) -> &[u8; PAYMENT_HASH_SIZE] {
        &self.payment_hash
    }

    /// Returns the payment hash as lowercase hex.
    #[must_use]
    pub fn payment_hash_hex(&self) -> String {
        hex::encode(self.payment_hash)
    }

    /// Returns the token id.
    #[must_use]
    pub const fn token_id(&self) -> &[u8; TOKEN_ID_SIZE] {
        &self.token_id
    }

    /// Returns true if `preimage` hashes to this identifier's payment hash.
    #[must_use]
    pub fn matches_preimage(&self, preimage: &[u8]) -> bool {
        let digest: [u8; 32] = Sha256::digest(preimage).into();
        digest == self.payment_hash
    }

    /// Encodes the identifier: version tag, then the version's payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IDENTIFIER_V0_LENGTH);
        out.extend_from_slice(&self.version.tag().to_be_bytes());
        match self.version {
            IdentifierVersion::V0 => {
                out.extend_from_slice(&self.payment_hash);
                out.extend_from_slice(&self.token_id);
            }
        }
        out
    }

    /// Decodes an identifier from bytes.
    ///
    /// # Errors
    ///
    /// - `LsatError::UnknownVersion` if the version tag is not recognized
    /// - `LsatError::SizeMismatch` if the input is truncated or has
    ///   trailing bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, LsatError> {
        let Some((tag, payload)) = bytes.split_first_chunk::<2>() else {
            return Err(LsatError::size_mismatch("identifier version", 2, bytes.len()));
        };
        match IdentifierVersion::from_tag(u16::from_be_bytes(*tag))? {
            IdentifierVersion::V0 => decode_v0(payload),
        }
    }

    /// Returns the encoded identifier as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Decodes an identifier from hex.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Identifier::decode`], plus
    /// `LsatError::InvalidHex` if the string is not valid hex.
    pub fn from_hex(hex_str: &str) -> Result<Self, LsatError> {
        let bytes = decode_hex("identifier", hex_str)?;
        Self::decode(&bytes)
    }
}

fn decode_hex(field: &'static str, text: &str) -> Result<Vec<u8>, LsatError> {
    hex::decode(text).map_err(|e| LsatError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

fn decode_v0(payload: &[u8]) -> Result<Identifier, LsatError> {
    let expected = PAYMENT_HASH_SIZE + TOKEN_ID_SIZE;
    if payload.len() != expected {
        return Err(LsatError::size_mismatch("identifier payload", expected, payload.len()));
    }
    let (payment_hash, token_id) = payload.split_at(PAYMENT_HASH_SIZE);
    Ok(Identifier {
        version: IdentifierVersion::V0,
        payment_hash: fixed(payment_hash, "payment hash")?,
        token_id: fixed(token_id, "token id")?,
    })
}

fn fixed<const N: usize>(bytes: &[u8], field: &'static str) -> Result<[u8; N], LsatError> {
    <[u8; N]>::try_from(bytes).map_err(|_| LsatError::size_mismatch(field, N, bytes.len()))
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout_is_big_endian_tag_then_fields() {
        let id = Identifier::new(&[0xaa; 32], &[0xbb; 32]).unwrap();
        let bytes = id.encode();

        assert_eq!(bytes.len(), IDENTIFIER_V0_LENGTH);
        assert_eq!(&bytes[..2], &[0, 0]);
        assert!(bytes[2..34].iter().all(|b| *b == 0xaa));
        assert!(bytes[34..].iter().all(|b| *b == 0xbb));
    }

    #[test]
    fn decode_roundtrip() {
        let id = Identifier::generate(&[7u8; 32]).unwrap();
        assert_eq!(Identifier::decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn hex_roundtrip() {
        let id = Identifier::generate(&[9u8; 32]).unwrap();
        assert_eq!(Identifier::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut bytes = Identifier::new(&[1; 32], &[2; 32]).unwrap().encode();
        bytes[1] = 1;

        assert_eq!(
            Identifier::decode(&bytes),
            Err(LsatError::UnknownVersion { version: 1 })
        );
    }

    #[test]
    fn version_tag_read_big_endian() {
        let mut bytes = vec![0x01, 0x00];
        bytes.extend_from_slice(&[0; 64]);

        assert_eq!(
            Identifier::decode(&bytes),
            Err(LsatError::UnknownVersion { version: 256 })
        );
    }

    #[test]
    fn short_fields_rejected_at_construction() {
        assert_eq!(
            Identifier::new(&[1; 31], &[2; 32]),
            Err(LsatError::size_mismatch("payment hash", 32, 31))
        );
        assert_eq!(
            Identifier::new(&[1; 32], &[2; 33]),
            Err(LsatError::size_mismatch("token id", 32, 33))
        );
    }

    #[test]
    fn truncated_input_rejected() {
        let bytes = Identifier::new(&[1; 32], &[2; 32]).unwrap().encode();

        assert!(matches!(
            Identifier::decode(&bytes[..40]),
            Err(LsatError::SizeMismatch { .. })
        ));
        assert!(matches!(
            Identifier::decode(&bytes[..1]),
            Err(LsatError::SizeMismatch { .. })
        ));
        assert!(matches!(
            Identifier::decode(&[]),
            Err(LsatError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Identifier::new(&[1; 32], &[2; 32]).unwrap().encode();
        bytes.push(0);

        assert!(matches!(
            Identifier::decode(&bytes),
            Err(LsatError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn generated_token_ids_differ() {
        let a = Identifier::generate(&[3; 32]).unwrap();
        let b = Identifier::generate(&[3; 32]).unwrap();

        assert_eq!(a.payment_hash(), b.payment_hash());
        assert_ne!(a.token_id(), b.token_id());
    }

    #[test]
    fn matches_preimage_checks_sha256() {
        let preimage = [5u8; 32];
        let hash: [u8; 32] = Sha256::digest(preimage).into();
        let id = Identifier::generate(&hash).unwrap();

        assert!(id.matches_preimage(&preimage));
        assert!(!id.matches_preimage(&[6u8; 32]));
    }

    #[test]
    fn generate_for_hash_hex_validates() {
        let hash = hex::encode([4u8; 32]);
        let id = Identifier::generate_for_hash_hex(&hash).unwrap();
        assert_eq!(id.payment_hash_hex(), hash);

        assert!(matches!(
            Identifier::generate_for_hash_hex("zz"),
            Err(LsatError::InvalidHex { field: "payment hash", .. })
        ));
        assert_eq!(
            Identifier::generate_for_hash_hex("abcd"),
            Err(LsatError::size_mismatch("payment hash", 32, 2))
        );
    }

    #[test]
    fn non_hex_is_not_reported_as_a_length() {
        // 64 characters, so a length guess would look right
        let almost = format!("{}zz", "ab".repeat(31));
        let err = Identifier::generate_for_hash_hex(&almost).unwrap_err();
        assert!(matches!(err, LsatError::InvalidHex { field: "payment hash", .. }));
        assert!(err.to_string().starts_with("payment hash is not valid hex"));

        assert!(matches!(
            Identifier::from_hex("abc"),
            Err(LsatError::InvalidHex { field: "identifier", .. })
        ));
    }
}
