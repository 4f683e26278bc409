//! Error types for LSAT operations.

use std::fmt;

use crate::invoice::ProviderError;

/// Errors that can occur while encoding, decoding, or verifying LSATs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LsatError {
    /// The identifier carries a version tag this crate does not understand.
    UnknownVersion {
        /// The version tag that was read
        version: u16,
    },
    /// A fixed-size field had the wrong length.
    SizeMismatch {
        /// Name of the offending field
        field: &'static str,
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },
    /// A hex-encoded field contains characters that are not hex digits or
    /// has an odd number of them.
    InvalidHex {
        /// Name of the offending field
        field: &'static str,
        /// Description from the hex decoder
        reason: String,
    },
    /// A caveat string has no comparator or no condition.
    InvalidCaveat {
        /// The caveat text as presented
        caveat: String,
    },
    /// A `WWW-Authenticate` challenge could not be parsed.
    MalformedChallenge {
        /// Description of the problem
        reason: String,
    },
    /// An `Authorization` header could not be parsed.
    MalformedHeader {
        /// Description of the problem
        reason: String,
    },
    /// A preimage is not 64 hex characters.
    BadPreimageFormat,
    /// The SHA-256 of the preimage does not equal the payment hash.
    PreimageMismatch {
        /// The payment hash the preimage was checked against
        payment_hash: String,
    },
    /// A different preimage has already been recorded on the token.
    PreimageAlreadySet,
    /// The token is past its expiration.
    Expired {
        /// Expiration time in milliseconds since the epoch
        valid_until: i64,
    },
    /// Signature or caveat verification failed.
    VerificationFailed {
        /// Description of the failure
        reason: String,
    },
    /// The invoice provider returned an error.
    InvoiceProvider(ProviderError),
    /// The underlying macaroon failed to encode, decode, or verify.
    Macaroon(MacaroonError),
    /// A root key could not be constructed.
    InvalidKeyFormat {
        /// Description of the key error
        reason: String,
    },
    /// A configuration value is out of range.
    InvalidConfig {
        /// Description of the configuration error
        reason: String,
    },
    /// The operation is disabled by configuration.
    Unsupported {
        /// Name of the operation
        operation: &'static str,
    },
}

impl LsatError {
    /// Creates a `SizeMismatch` error.
    #[must_use]
    pub const fn size_mismatch(field: &'static str, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            field,
            expected,
            actual,
        }
    }

    /// Creates a `VerificationFailed` error.
    #[must_use]
    pub fn verification_failed(reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the token expired.
    ///
    /// Expiry is recoverable: the client should discard its token and pay
    /// for a new one. Every other token error is terminal for the request.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }

    /// HTTP status code a transport layer should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Expired { .. } => 401,
            Self::InvoiceProvider(_) => 502,
            Self::InvalidKeyFormat { .. }
            | Self::InvalidConfig { .. }
            | Self::Macaroon(MacaroonError::Crypto { .. }) => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for LsatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVersion { version } => {
                write!(f, "unknown identifier version {version}")
            }
            Self::SizeMismatch {
                field,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "{field} must be exactly {expected} bytes, got {actual}"
                )
            }
            Self::InvalidHex { field, reason } => {
                write!(f, "{field} is not valid hex: {reason}")
            }
            Self::InvalidCaveat { caveat } => {
                write!(
                    f,
                    "invalid caveat '{caveat}'; expected <condition><comparator><value> with one of '=', '<', '>'"
                )
            }
            Self::MalformedChallenge { reason } => {
                write!(f, "malformed LSAT challenge: {reason}")
            }
            Self::MalformedHeader { reason } => {
                write!(f, "malformed LSAT authorization header: {reason}")
            }
            Self::BadPreimageFormat => {
                write!(f, "preimage must be a 32-byte hex string (64 characters)")
            }
            Self::PreimageMismatch { payment_hash } => {
                write!(
                    f,
                    "preimage does not hash to payment hash {payment_hash}"
                )
            }
            Self::PreimageAlreadySet => {
                write!(f, "a different preimage is already set on this token")
            }
            Self::Expired { valid_until } => {
                write!(
                    f,
                    "LSAT expired at {valid_until} ms; pay a new invoice to obtain a fresh token"
                )
            }
            Self::VerificationFailed { reason } => {
                write!(f, "LSAT verification failed: {reason}")
            }
            Self::InvoiceProvider(err) => write!(f, "invoice provider error: {err}"),
            Self::Macaroon(err) => write!(f, "macaroon error: {err}"),
            Self::InvalidKeyFormat { reason } => {
                write!(f, "invalid root key: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid paywall configuration: {reason}")
            }
            Self::Unsupported { operation } => {
                write!(f, "{operation} is not enabled in this paywall configuration")
            }
        }
    }
}

impl std::error::Error for LsatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvoiceProvider(err) => Some(err),
            Self::Macaroon(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MacaroonError> for LsatError {
    fn from(err: MacaroonError) -> Self {
        Self::Macaroon(err)
    }
}

impl From<ProviderError> for LsatError {
    fn from(err: ProviderError) -> Self {
        Self::InvoiceProvider(err)
    }
}

/// Errors raised by the macaroon backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacaroonError {
    /// The serialized macaroon could not be decoded.
    Encoding {
        /// Description of the encoding problem
        reason: String,
    },
    /// The binary format version is not supported.
    UnsupportedVersion {
        /// The version byte that was read
        version: u8,
    },
    /// The HMAC chain does not match the signature.
    InvalidSignature,
    /// The verification callback rejected a caveat.
    CaveatNotSatisfied {
        /// The caveat text that was rejected
        caveat: String,
    },
    /// Third-party caveats are not supported by this verifier.
    ThirdPartyCaveat,
    /// The keyed hash could not be computed.
    Crypto {
        /// Description of the failure
        reason: String,
    },
}

impl MacaroonError {
    pub(crate) fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MacaroonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding { reason } => write!(f, "cannot decode macaroon: {reason}"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported macaroon format version {version}; only v2 binary is accepted")
            }
            Self::InvalidSignature => {
                write!(f, "macaroon signature mismatch; it was not minted with this root key or was tampered with")
            }
            Self::CaveatNotSatisfied { caveat } => {
                write!(f, "caveat '{caveat}' not satisfied")
            }
            Self::ThirdPartyCaveat => {
                write!(f, "third-party caveats cannot be discharged by this verifier")
            }
            Self::Crypto { reason } => write!(f, "keyed hash failed: {reason}"),
        }
    }
}

impl std::error::Error for MacaroonError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_is_distinct_from_invalid() {
        let expired = LsatError::Expired { valid_until: 10 };
        let invalid = LsatError::verification_failed("bad signature");

        assert!(expired.is_expired());
        assert!(!invalid.is_expired());
        assert_ne!(expired.status_code(), invalid.status_code());
        assert_eq!(expired.status_code(), 401);
        assert_eq!(invalid.status_code(), 400);
    }

    #[test]
    fn provider_errors_map_to_bad_gateway() {
        let err = LsatError::from(ProviderError::new("node offline"));
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("node offline"));
    }

    #[test]
    fn size_mismatch_message_names_field() {
        let err = LsatError::size_mismatch("payment hash", 32, 31);
        assert_eq!(err.to_string(), "payment hash must be exactly 32 bytes, got 31");
    }

    #[test]
    fn macaroon_errors_convert() {
        let err: LsatError = MacaroonError::InvalidSignature.into();
        assert!(matches!(err, LsatError::Macaroon(MacaroonError::InvalidSignature)));
    }
}
