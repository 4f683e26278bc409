//! Macaroon backend.
//!
//! The rest of the crate only talks to macaroons through the [`Macaroon`]
//! trait, so the signing primitive can be replaced without touching the
//! token format or the state machine. [`HmacMacaroon`] is the default
//! backend: HMAC-SHA256 chaining as in libmacaroons, serialized in the v2
//! binary format and wrapped in base64, which is what other LSAT
//! implementations exchange.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::MacaroonError;
use crate::keys::RootKey;

type HmacSha256 = Hmac<Sha256>;

/// Key used to derive the signing key from a root key.
const KEY_GENERATOR: &[u8] = b"macaroons-key-generator";

const FORMAT_V2: u8 = 2;
const FIELD_EOS: u8 = 0;
const FIELD_LOCATION: u8 = 1;
const FIELD_IDENTIFIER: u8 = 2;
const FIELD_VERIFICATION_ID: u8 = 4;
const FIELD_SIGNATURE: u8 = 6;
const SIGNATURE_SIZE: usize = 32;

/// Callback deciding whether a single caveat predicate holds.
pub type CaveatChecker<'a> = dyn FnMut(&str) -> bool + 'a;

/// Minimal operation set the LSAT core needs from a macaroon.
pub trait Macaroon: Clone + Sized {
    /// Mints a macaroon for `identifier` signed with `key`.
    ///
    /// # Errors
    ///
    /// Returns `MacaroonError` if the backend cannot compute the signature.
    fn create(location: &str, key: &RootKey, identifier: &[u8]) -> Result<Self, MacaroonError>;

    /// Appends a first-party caveat and extends the signature.
    ///
    /// # Errors
    ///
    /// Returns `MacaroonError` if the backend cannot compute the signature.
    fn add_first_party_caveat(&mut self, predicate: &str) -> Result<(), MacaroonError>;

    /// Returns the identifier bytes.
    fn identifier(&self) -> &[u8];

    /// Returns the location hint, if any.
    fn location(&self) -> Option<&str>;

    /// Returns the first-party caveat predicates, oldest first.
    fn first_party_caveats(&self) -> Vec<String>;

    /// Serializes to the text form exchanged in headers.
    fn serialize(&self) -> String;

    /// Parses the text form produced by [`Macaroon::serialize`].
    ///
    /// # Errors
    ///
    /// Returns `MacaroonError` if the text cannot be decoded.
    fn deserialize(raw: &str) -> Result<Self, MacaroonError>;

    /// Checks the signature against `key`, calling `checker` for every
    /// first-party caveat in order.
    ///
    /// # Errors
    ///
    /// - `MacaroonError::CaveatNotSatisfied` if `checker` returns false
    /// - `MacaroonError::InvalidSignature` if the signature does not match
    fn verify(&self, key: &RootKey, checker: &mut CaveatChecker<'_>) -> Result<(), MacaroonError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawCaveat {
    identifier: Vec<u8>,
    verification_id: Option<Vec<u8>>,
    location: Option<String>,
}

/// HMAC-SHA256 macaroon compatible with libmacaroons' v2 format.
///
/// # Example
///
/// ```
/// use lsat_paywall::{HmacMacaroon, Macaroon, RootKey};
///
/// let key = RootKey::generate();
/// let mut macaroon = HmacMacaroon::create("lsat", &key, b"token id").unwrap();
/// macaroon.add_first_party_caveat("route=/videos").unwrap();
///
/// let restored = HmacMacaroon::deserialize(&macaroon.serialize()).unwrap();
/// assert_eq!(restored.first_party_caveats(), vec!["route=/videos"]);
/// assert!(restored.verify(&key, &mut |_| true).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacMacaroon {
    location: Option<String>,
    identifier: Vec<u8>,
    caveats: Vec<RawCaveat>,
    signature: [u8; SIGNATURE_SIZE],
}

impl HmacMacaroon {
    /// Returns the current signature.
    #[must_use]
    pub const fn signature(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.signature
    }

    /// Encodes the macaroon in the v2 binary format.
    #[must_use]
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = vec![FORMAT_V2];
        if let Some(location) = &self.location {
            put_field(&mut out, FIELD_LOCATION, location.as_bytes());
        }
        put_field(&mut out, FIELD_IDENTIFIER, &self.identifier);
        out.push(FIELD_EOS);
        for caveat in &self.caveats {
            if let Some(location) = &caveat.location {
                put_field(&mut out, FIELD_LOCATION, location.as_bytes());
            }
            put_field(&mut out, FIELD_IDENTIFIER, &caveat.identifier);
            if let Some(vid) = &caveat.verification_id {
                put_field(&mut out, FIELD_VERIFICATION_ID, vid);
            }
            out.push(FIELD_EOS);
        }
        out.push(FIELD_EOS);
        put_field(&mut out, FIELD_SIGNATURE, &self.signature);
        out
    }

    /// Decodes a macaroon from the v2 binary format.
    ///
    /// # Errors
    ///
    /// Returns `MacaroonError::UnsupportedVersion` for anything but v2, and
    /// `MacaroonError::Encoding` for truncated or malformed input.
    pub fn from_binary(bytes: &[u8]) -> Result<Self, MacaroonError> {
        let mut reader = FieldReader::new(bytes);
        let version = reader.byte()?;
        if version != FORMAT_V2 {
            return Err(MacaroonError::UnsupportedVersion { version });
        }

        let mut location = None;
        let mut field = reader.field()?;
        if field.0 == FIELD_LOCATION {
            location = Some(utf8(field.1, "location")?);
            field = reader.field()?;
        }
        if field.0 != FIELD_IDENTIFIER {
            return Err(MacaroonError::encoding("missing identifier"));
        }
        let identifier = field.1.to_vec();
        reader.expect_eos()?;

        let mut caveats = Vec::new();
        loop {
            let (kind, data) = reader.field()?;
            if kind == FIELD_EOS {
                break;
            }
            caveats.push(read_caveat(&mut reader, kind, data)?);
        }

        let (kind, data) = reader.field()?;
        if kind != FIELD_SIGNATURE {
            return Err(MacaroonError::encoding("missing signature"));
        }
        let signature = <[u8; SIGNATURE_SIZE]>::try_from(data)
            .map_err(|_| MacaroonError::encoding("signature must be 32 bytes"))?;
        if !reader.is_empty() {
            return Err(MacaroonError::encoding("trailing data after signature"));
        }

        Ok(Self {
            location,
            identifier,
            caveats,
            signature,
        })
    }
}

impl Macaroon for HmacMacaroon {
    fn create(location: &str, key: &RootKey, identifier: &[u8]) -> Result<Self, MacaroonError> {
        let derived = derive_key(key)?;
        let signature = keyed_hash(&derived, identifier)?;
        Ok(Self {
            location: (!location.is_empty()).then(|| location.to_string()),
            identifier: identifier.to_vec(),
            caveats: Vec::new(),
            signature,
        })
    }

    fn add_first_party_caveat(&mut self, predicate: &str) -> Result<(), MacaroonError> {
        self.signature = keyed_hash(&self.signature, predicate.as_bytes())?;
        self.caveats.push(RawCaveat {
            identifier: predicate.as_bytes().to_vec(),
            verification_id: None,
            location: None,
        });
        Ok(())
    }

    fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn first_party_caveats(&self) -> Vec<String> {
        self.caveats
            .iter()
            .filter(|c| c.verification_id.is_none())
            .map(|c| String::from_utf8_lossy(&c.identifier).into_owned())
            .collect()
    }

    fn serialize(&self) -> String {
        STANDARD.encode(self.to_binary())
    }

    fn deserialize(raw: &str) -> Result<Self, MacaroonError> {
        let raw = raw.trim();
        let bytes = STANDARD
            .decode(raw)
            .or_else(|_| URL_SAFE.decode(raw))
            .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
            .or_else(|_| STANDARD_NO_PAD.decode(raw))
            .map_err(|e| MacaroonError::encoding(format!("invalid base64: {e}")))?;
        Self::from_binary(&bytes)
    }

    fn verify(&self, key: &RootKey, checker: &mut CaveatChecker<'_>) -> Result<(), MacaroonError> {
        let mut mac = new_mac(&derive_key(key)?)?;
        mac.update(&self.identifier);
        for caveat in &self.caveats {
            if caveat.verification_id.is_some() {
                return Err(MacaroonError::ThirdPartyCaveat);
            }
            let predicate = String::from_utf8_lossy(&caveat.identifier).into_owned();
            if !checker(&predicate) {
                return Err(MacaroonError::CaveatNotSatisfied { caveat: predicate });
            }
            let signature: [u8; SIGNATURE_SIZE] = mac.finalize().into_bytes().into();
            mac = new_mac(&signature)?;
            mac.update(&caveat.identifier);
        }
        mac.verify_slice(&self.signature)
            .map_err(|_| MacaroonError::InvalidSignature)
    }
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, MacaroonError> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| MacaroonError::Crypto {
        reason: e.to_string(),
    })
}

fn keyed_hash(key: &[u8], data: &[u8]) -> Result<[u8; SIGNATURE_SIZE], MacaroonError> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn derive_key(key: &RootKey) -> Result<[u8; SIGNATURE_SIZE], MacaroonError> {
    keyed_hash(KEY_GENERATOR, key.as_bytes())
}

fn read_caveat(
    reader: &mut FieldReader<'_>,
    first_kind: u8,
    first_data: &[u8],
) -> Result<RawCaveat, MacaroonError> {
    let mut location = None;
    let (mut kind, mut data) = (first_kind, first_data);
    if kind == FIELD_LOCATION {
        location = Some(utf8(data, "caveat location")?);
        (kind, data) = reader.field()?;
    }
    if kind != FIELD_IDENTIFIER {
        return Err(MacaroonError::encoding("caveat is missing its identifier"));
    }
    let identifier = data.to_vec();

    let mut verification_id = None;
    let (kind, data) = reader.field()?;
    if kind == FIELD_VERIFICATION_ID {
        verification_id = Some(data.to_vec());
        reader.expect_eos()?;
    } else if kind != FIELD_EOS {
        return Err(MacaroonError::encoding(format!(
            "unexpected field {kind} in caveat"
        )));
    }

    Ok(RawCaveat {
        identifier,
        verification_id,
        location,
    })
}

fn utf8(data: &[u8], what: &str) -> Result<String, MacaroonError> {
    String::from_utf8(data.to_vec()).map_err(|_| MacaroonError::encoding(format!("{what} is not UTF-8")))
}

fn put_field(out: &mut Vec<u8>, kind: u8, data: &[u8]) {
    out.push(kind);
    put_uvarint(out, data.len() as u64);
    out.extend_from_slice(data);
}

#[allow(clippy::cast_possible_truncation)]
fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    const fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn byte(&mut self) -> Result<u8, MacaroonError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| MacaroonError::encoding("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn uvarint(&mut self) -> Result<u64, MacaroonError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let b = self.byte()?;
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MacaroonError::encoding("varint overflow"))
    }

    /// Reads `(field type, data)`; an EOS marker yields empty data.
    fn field(&mut self) -> Result<(u8, &'a [u8]), MacaroonError> {
        let kind = self.byte()?;
        if kind == FIELD_EOS {
            return Ok((FIELD_EOS, &[]));
        }
        let len = usize::try_from(self.uvarint()?)
            .map_err(|_| MacaroonError::encoding("field length overflow"))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| MacaroonError::encoding("field extends past end of input"))?;
        let data = &self.bytes[self.pos..end];
        self.pos = end;
        Ok((kind, data))
    }

    fn expect_eos(&mut self) -> Result<(), MacaroonError> {
        match self.byte()? {
            FIELD_EOS => Ok(()),
            other => Err(MacaroonError::encoding(format!(
                "expected end of section, found field {other}"
            ))),
        }
    }
}
