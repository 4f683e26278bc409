//! LSAT token format: challenges, authorization headers, and preimage binding.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use crate::caveat::{Caveat, expiration_from_caveats};
use crate::constants::{LSAT_SCHEME, PREIMAGE_HEX_LENGTH};
use crate::error::LsatError;
use crate::identifier::Identifier;
use crate::macaroon::{HmacMacaroon, Macaroon};

/// An LSAT backed by the default HMAC macaroon.
pub type Lsat = LsatToken<HmacMacaroon>;

/// A macaroon bound to a Lightning invoice.
///
/// The token is identified by the [`Identifier`] inside its macaroon. It is
/// "pending" until the payment preimage is attached, and expires once the
/// newest `expiration` caveat on the macaroon has passed.
///
/// # Example
///
/// ```
/// use lsat_paywall::{HmacMacaroon, Identifier, Lsat, Macaroon, RootKey};
/// use sha2::{Digest, Sha256};
///
/// let preimage = [7u8; 32];
/// let payment_hash: [u8; 32] = Sha256::digest(preimage).into();
/// let identifier = Identifier::generate(&payment_hash).unwrap();
/// let macaroon = HmacMacaroon::create("lsat", &RootKey::generate(), &identifier.encode()).unwrap();
///
/// let lsat = Lsat::from_macaroon(macaroon, Some("lnbc1...".to_string())).unwrap();
/// let challenge = lsat.challenge_header().unwrap();
///
/// // the client parses the challenge, pays, and attaches the preimage
/// let mut client = Lsat::from_header(&challenge).unwrap();
/// assert!(client.is_pending());
/// client.add_preimage(&hex::encode(preimage)).unwrap();
/// assert!(!client.is_pending());
///
/// let token = client.to_token();
/// let presented = Lsat::from_token(&token).unwrap();
/// assert_eq!(presented.payment_hash(), lsat.payment_hash());
/// assert!(!presented.is_pending());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsatToken<M: Macaroon = HmacMacaroon> {
    identifier: Identifier,
    macaroon: M,
    invoice: Option<String>,
    valid_until: i64,
    payment_preimage: Option<String>,
    amount_paid: Option<u64>,
    routing_fee_paid: Option<u64>,
    time_created: i64,
}

impl<M: Macaroon> LsatToken<M> {
    /// Builds a token around a macaroon.
    ///
    /// # Errors
    ///
    /// Returns the identifier decoding errors (`UnknownVersion`,
    /// `SizeMismatch`) if the macaroon was not minted for an LSAT.
    pub fn from_macaroon(macaroon: M, invoice: Option<String>) -> Result<Self, LsatError> {
        let identifier = Identifier::decode(macaroon.identifier())?;
        let mut lsat = Self {
            identifier,
            macaroon,
            invoice,
            valid_until: 0,
            payment_preimage: None,
            amount_paid: None,
            routing_fee_paid: None,
            time_created: chrono::Utc::now().timestamp_millis(),
        };
        lsat.refresh_valid_until();
        Ok(lsat)
    }

    /// Builds a token from a serialized macaroon.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::Macaroon` if the macaroon cannot be decoded, or
    /// the errors of [`LsatToken::from_macaroon`].
    pub fn from_serialized_macaroon(raw: &str, invoice: Option<String>) -> Result<Self, LsatError> {
        Self::from_macaroon(M::deserialize(raw)?, invoice)
    }

    /// Parses an `Authorization` value: `LSAT <macaroon>:<preimage>`.
    ///
    /// The scheme is matched case-insensitively. The preimage may be empty
    /// or omitted together with the `:`; when present it is checked
    /// against the payment hash.
    ///
    /// # Errors
    ///
    /// - `LsatError::MalformedHeader` if the scheme or macaroon is missing
    /// - `LsatError::Macaroon` if the macaroon cannot be decoded
    /// - the errors of [`LsatToken::add_preimage`] for a bad preimage
    pub fn from_token(value: &str) -> Result<Self, LsatError> {
        let credentials = strip_scheme(value).ok_or_else(|| LsatError::MalformedHeader {
            reason: format!("expected '{LSAT_SCHEME} <macaroon>:<preimage>'"),
        })?;
        let (macaroon, preimage) = credentials.split_once(':').unwrap_or((credentials, ""));
        if macaroon.is_empty() {
            return Err(LsatError::MalformedHeader {
                reason: "missing macaroon".to_string(),
            });
        }

        let mut lsat = Self::from_serialized_macaroon(macaroon, None)?;
        let preimage = preimage.trim();
        if !preimage.is_empty() {
            lsat.add_preimage(preimage)?;
        }
        Ok(lsat)
    }

    /// Parses a challenge: the part of a `WWW-Authenticate` value after the
    /// scheme.
    ///
    /// Accepts the base64 form `base64("macaroon=<m>, invoice=<i>")` as well
    /// as the plain `macaroon="<m>", invoice="<i>"` form.
    ///
    /// # Errors
    ///
    /// - `LsatError::MalformedChallenge` if either part is missing
    /// - `LsatError::Macaroon` if the macaroon cannot be decoded
    pub fn from_challenge(challenge: &str) -> Result<Self, LsatError> {
        let challenge = challenge.trim();
        let decoded = STANDARD
            .decode(challenge)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|text| text.contains("macaroon="));
        let text = decoded.as_deref().unwrap_or(challenge);

        let mut macaroon = None;
        let mut invoice = None;
        for part in text.split(|c: char| c == ',' || c.is_whitespace()) {
            if let Some(value) = part.strip_prefix("macaroon=") {
                macaroon = Some(unquote(value));
            } else if let Some(value) = part.strip_prefix("invoice=") {
                invoice = Some(unquote(value));
            }
        }

        let missing = |part: &str| LsatError::MalformedChallenge {
            reason: format!("missing {part}"),
        };
        let macaroon = macaroon.filter(|m| !m.is_empty()).ok_or_else(|| missing("macaroon"))?;
        let invoice = invoice.filter(|i| !i.is_empty()).ok_or_else(|| missing("invoice"))?;

        Self::from_serialized_macaroon(macaroon, Some(invoice.to_string()))
    }

    /// Parses a full `WWW-Authenticate` value: `LSAT <challenge>`.
    ///
    /// # Errors
    ///
    /// `LsatError::MalformedChallenge` if the scheme is missing, otherwise
    /// the errors of [`LsatToken::from_challenge`].
    pub fn from_header(value: &str) -> Result<Self, LsatError> {
        let challenge = strip_scheme(value).ok_or_else(|| LsatError::MalformedChallenge {
            reason: format!("expected '{LSAT_SCHEME} <challenge>'"),
        })?;
        Self::from_challenge(challenge)
    }

    /// Returns the `Authorization` value presenting this token.
    #[must_use]
    pub fn to_token(&self) -> String {
        format!(
            "{LSAT_SCHEME} {}:{}",
            self.macaroon.serialize(),
            self.payment_preimage.as_deref().unwrap_or_default()
        )
    }

    /// Returns the base64 challenge for this token.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::MalformedChallenge` if the token has no invoice.
    pub fn to_challenge(&self) -> Result<String, LsatError> {
        let invoice = self.invoice.as_deref().ok_or_else(|| LsatError::MalformedChallenge {
            reason: "token has no invoice to challenge with".to_string(),
        })?;
        let text = format!("macaroon={}, invoice={invoice}", self.macaroon.serialize());
        Ok(STANDARD.encode(text))
    }

    /// Returns the `WWW-Authenticate` value: `LSAT <challenge>`.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::MalformedChallenge` if the token has no invoice.
    pub fn challenge_header(&self) -> Result<String, LsatError> {
        Ok(format!("{LSAT_SCHEME} {}", self.to_challenge()?))
    }

    /// Attaches the payment preimage, proving the invoice was paid.
    ///
    /// Setting the same preimage twice is a no-op.
    ///
    /// # Errors
    ///
    /// - `LsatError::BadPreimageFormat` unless `preimage` is 64 hex characters
    /// - `LsatError::PreimageMismatch` if its SHA-256 is not the payment hash
    /// - `LsatError::PreimageAlreadySet` if a different preimage is set
    pub fn add_preimage(&mut self, preimage: &str) -> Result<(), LsatError> {
        let bytes = decode_preimage(preimage)?;
        let digest: [u8; 32] = Sha256::digest(&bytes).into();
        if &digest != self.identifier.payment_hash() {
            return Err(LsatError::PreimageMismatch {
                payment_hash: self.payment_hash(),
            });
        }

        let normalized = hex::encode(bytes);
        match &self.payment_preimage {
            Some(existing) if *existing == normalized => Ok(()),
            Some(_) => Err(LsatError::PreimageAlreadySet),
            None => {
                self.payment_preimage = Some(normalized);
                Ok(())
            }
        }
    }

    /// Returns true if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp_millis())
    }

    /// Returns true if the token has expired at `now_ms`.
    ///
    /// A token without an expiration never expires.
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: i64) -> bool {
        self.valid_until != 0 && self.valid_until <= now_ms
    }

    /// Returns true while no payment preimage is attached.
    ///
    /// This says nothing about what the invoice provider reports.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.payment_preimage.is_none()
    }

    /// Decodes every first-party caveat on the macaroon, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidCaveat` for the first undecodable caveat.
    pub fn caveats(&self) -> Result<Vec<Caveat>, LsatError> {
        self.macaroon
            .first_party_caveats()
            .iter()
            .map(|c| Caveat::decode(c))
            .collect()
    }

    /// Appends a caveat to the macaroon.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::Macaroon` if the signature cannot be extended.
    pub fn add_first_party_caveat(&mut self, caveat: &Caveat) -> Result<(), LsatError> {
        self.macaroon.add_first_party_caveat(&caveat.encode())?;
        self.refresh_valid_until();
        Ok(())
    }

    fn refresh_valid_until(&mut self) {
        let caveats: Vec<Caveat> = self
            .macaroon
            .first_party_caveats()
            .iter()
            .filter_map(|c| Caveat::decode(c).ok())
            .collect();
        self.valid_until = expiration_from_caveats(&caveats);
    }

    /// Returns the hex-encoded identifier, which serves as the token id.
    #[must_use]
    pub fn id(&self) -> String {
        self.identifier.to_hex()
    }

    /// Returns the decoded identifier.
    #[must_use]
    pub const fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Returns the macaroon.
    #[must_use]
    pub const fn macaroon(&self) -> &M {
        &self.macaroon
    }

    /// Consumes the token, returning the macaroon.
    #[must_use]
    pub fn into_macaroon(self) -> M {
        self.macaroon
    }

    /// Returns the serialized macaroon.
    #[must_use]
    pub fn base_macaroon(&self) -> String {
        self.macaroon.serialize()
    }

    /// Returns the hex-encoded payment hash.
    #[must_use]
    pub fn payment_hash(&self) -> String {
        self.identifier.payment_hash_hex()
    }

    /// Returns the payment request, if known.
    #[must_use]
    pub fn invoice(&self) -> Option<&str> {
        self.invoice.as_deref()
    }

    /// Sets the payment request.
    pub fn set_invoice(&mut self, invoice: impl Into<String>) {
        self.invoice = Some(invoice.into());
    }

    /// Returns the expiration in milliseconds, or 0 if none.
    #[must_use]
    pub const fn valid_until(&self) -> i64 {
        self.valid_until
    }

    /// Returns the hex preimage, once attached.
    #[must_use]
    pub fn payment_preimage(&self) -> Option<&str> {
        self.payment_preimage.as_deref()
    }

    /// Returns the amount paid in satoshis, if recorded.
    #[must_use]
    pub const fn amount_paid(&self) -> Option<u64> {
        self.amount_paid
    }

    /// Records the amount paid in satoshis.
    pub const fn set_amount_paid(&mut self, amount: u64) {
        self.amount_paid = Some(amount);
    }

    /// Returns the routing fee paid in satoshis, if recorded.
    #[must_use]
    pub const fn routing_fee_paid(&self) -> Option<u64> {
        self.routing_fee_paid
    }

    /// Records the routing fee paid in satoshis.
    pub const fn set_routing_fee_paid(&mut self, fee: u64) {
        self.routing_fee_paid = Some(fee);
    }

    /// Returns when this value was constructed, in milliseconds.
    #[must_use]
    pub const fn time_created(&self) -> i64 {
        self.time_created
    }
}

/// Validates and decodes a hex preimage.
pub(crate) fn decode_preimage(preimage: &str) -> Result<Vec<u8>, LsatError> {
    if preimage.len() != PREIMAGE_HEX_LENGTH {
        return Err(LsatError::BadPreimageFormat);
    }
    hex::decode(preimage).map_err(|_| LsatError::BadPreimageFormat)
}

fn strip_scheme(value: &str) -> Option<&str> {
    let value = value.trim();
    let (scheme, rest) = value.split_once(char::is_whitespace)?;
    scheme
        .eq_ignore_ascii_case(LSAT_SCHEME)
        .then(|| rest.trim())
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"')
}
