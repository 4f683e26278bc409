//! Built-in satisfiers for the standard LSAT caveat conditions.

use std::net::IpAddr;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
use sha2::{Digest, Sha256};

use crate::caveat::Caveat;
use crate::constants::{
    CHALLENGE_CONDITION, EXPIRATION_CONDITION, ORIGIN_CONDITION, ROUTE_CONDITION,
};
use crate::error::LsatError;
use crate::satisfier::{Satisfier, SatisfierContext};

/// Enforces `expiration=<ms since epoch>` caveats.
///
/// Later caveats may only move the expiration earlier, and the newest one
/// must not be in the past. Non-numeric values never satisfy.
///
/// # Example
///
/// ```
/// use lsat_paywall::{Caveat, ExpirationSatisfier, Satisfier, SatisfierContext};
///
/// let mut ctx = SatisfierContext::new(1_000);
/// assert!(ExpirationSatisfier.satisfy_final(&Caveat::expiration(2_000), &mut ctx));
/// assert!(!ExpirationSatisfier.satisfy_final(&Caveat::expiration(500), &mut ctx));
///
/// // tightening is fine, widening is not
/// let (early, late) = (Caveat::expiration(1_500), Caveat::expiration(3_000));
/// assert!(ExpirationSatisfier.satisfy_previous(&late, &early, &ctx));
/// assert!(!ExpirationSatisfier.satisfy_previous(&early, &late, &ctx));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationSatisfier;

impl ExpirationSatisfier {
    fn timestamp(caveat: &Caveat) -> Option<i64> {
        (caveat.condition() == EXPIRATION_CONDITION)
            .then(|| caveat.numeric_value())
            .flatten()
    }
}

impl Satisfier for ExpirationSatisfier {
    fn condition(&self) -> &str {
        EXPIRATION_CONDITION
    }

    fn satisfy_previous(&self, prev: &Caveat, curr: &Caveat, _ctx: &SatisfierContext) -> bool {
        match (Self::timestamp(prev), Self::timestamp(curr)) {
            (Some(prev), Some(curr)) => prev >= curr,
            _ => false,
        }
    }

    fn satisfy_final(&self, caveat: &Caveat, ctx: &mut SatisfierContext) -> bool {
        Self::timestamp(caveat).is_some_and(|until| until >= ctx.now_ms())
    }
}

/// Pins a token to the client address it was issued to (`ip=<addr>`).
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginSatisfier;

impl Satisfier for OriginSatisfier {
    fn condition(&self) -> &str {
        ORIGIN_CONDITION
    }

    fn satisfy_previous(&self, prev: &Caveat, curr: &Caveat, _ctx: &SatisfierContext) -> bool {
        prev.value() == curr.value()
    }

    fn satisfy_final(&self, caveat: &Caveat, ctx: &mut SatisfierContext) -> bool {
        let Ok(expected) = caveat.value().parse::<IpAddr>() else {
            return false;
        };
        ctx.client_ip() == Some(expected)
    }
}

/// Restricts a token to a request path (`route=<path>`).
///
/// The value must equal the request path or the configured master route.
/// With sub-routes enabled, `route=/api` also admits `/api/items`, but never
/// `/apiary`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteSatisfier;

impl Satisfier for RouteSatisfier {
    fn condition(&self) -> &str {
        ROUTE_CONDITION
    }

    fn satisfy_previous(&self, prev: &Caveat, curr: &Caveat, _ctx: &SatisfierContext) -> bool {
        prev.value() == curr.value()
    }

    fn satisfy_final(&self, caveat: &Caveat, ctx: &mut SatisfierContext) -> bool {
        let route = caveat.value();
        if route == ctx.path() || ctx.master_route() == Some(route) {
            return true;
        }
        ctx.allow_subroutes()
            && ctx
                .path()
                .strip_prefix(route.trim_end_matches('/'))
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Binds a token to a Lightning node key (`challenge=<challenge>:<pubkey>:<sig>`).
///
/// The paywall mints the first instance with an empty signature. The node
/// owner proves control of the key by appending a second instance that
/// carries a secp256k1 signature over the SHA-256 of the challenge string
/// (see [`sign_challenge`]). Within one verification run the unsigned
/// instance is accepted once; every other instance must carry a valid
/// signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChallengeSatisfier;

impl Satisfier for ChallengeSatisfier {
    fn condition(&self) -> &str {
        CHALLENGE_CONDITION
    }

    fn satisfy_previous(&self, prev: &Caveat, curr: &Caveat, _ctx: &SatisfierContext) -> bool {
        match (ChallengeValue::parse(prev.value()), ChallengeValue::parse(curr.value())) {
            (Some(prev), Some(curr)) => {
                prev.challenge == curr.challenge
                    && prev.pubkey == curr.pubkey
                    && !curr.signature.is_empty()
            }
            _ => false,
        }
    }

    fn satisfy_final(&self, caveat: &Caveat, ctx: &mut SatisfierContext) -> bool {
        let Some(value) = ChallengeValue::parse(caveat.value()) else {
            return false;
        };
        if value.signature.is_empty() {
            return ctx.claim_unsigned_challenge();
        }
        value.verify()
    }
}

/// The three `:`-separated parts of a challenge caveat value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChallengeValue<'a> {
    challenge: &'a str,
    pubkey: &'a str,
    signature: &'a str,
}

impl<'a> ChallengeValue<'a> {
    fn parse(value: &'a str) -> Option<Self> {
        let mut parts = value.splitn(3, ':');
        let challenge = parts.next().filter(|c| !c.is_empty())?;
        let pubkey = parts.next().filter(|p| !p.is_empty())?;
        let signature = parts.next()?;
        Some(Self {
            challenge,
            pubkey,
            signature,
        })
    }

    fn verify(&self) -> bool {
        let Some(pubkey) = hex::decode(self.pubkey)
            .ok()
            .and_then(|bytes| PublicKey::from_slice(&bytes).ok())
        else {
            return false;
        };
        let Some(mut signature) = hex::decode(self.signature).ok().and_then(|bytes| {
            Signature::from_compact(&bytes)
                .or_else(|_| Signature::from_der(&bytes))
                .ok()
        }) else {
            return false;
        };
        signature.normalize_s();

        Secp256k1::verification_only()
            .verify_ecdsa(&challenge_message(self.challenge), &signature, &pubkey)
            .is_ok()
    }
}

fn challenge_message(challenge: &str) -> Message {
    Message::from_digest(Sha256::digest(challenge.as_bytes()).into())
}

/// Signs an unsigned challenge caveat with the node's secret key.
///
/// Returns the caveat the node owner appends to the discharge macaroon: the
/// same challenge and public key, followed by a compact hex signature.
///
/// # Errors
///
/// - `LsatError::InvalidCaveat` if `caveat` is not a challenge caveat
/// - `LsatError::VerificationFailed` if `secret` does not belong to the
///   public key named in the caveat
pub fn sign_challenge(caveat: &Caveat, secret: &SecretKey) -> Result<Caveat, LsatError> {
    let invalid = || LsatError::InvalidCaveat {
        caveat: caveat.encode(),
    };
    if caveat.condition() != CHALLENGE_CONDITION {
        return Err(invalid());
    }
    let value = ChallengeValue::parse(caveat.value()).ok_or_else(invalid)?;

    let secp = Secp256k1::signing_only();
    let pubkey = PublicKey::from_secret_key(&secp, secret);
    if hex::encode(pubkey.serialize()) != value.pubkey.to_ascii_lowercase() {
        return Err(LsatError::verification_failed(
            "secret key does not match the challenge public key",
        ));
    }

    let signature = secp.sign_ecdsa(&challenge_message(value.challenge), secret);
    Ok(Caveat::new(
        CHALLENGE_CONDITION,
        format!(
            "{}:{}:{}",
            value.challenge,
            value.pubkey,
            hex::encode(signature.serialize_compact())
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_key() -> (SecretKey, String) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0xcd; 32]).unwrap();
        let pubkey = PublicKey::from_secret_key(&secp, &secret);
        (secret, hex::encode(pubkey.serialize()))
    }

    fn unsigned(pubkey: &str) -> Caveat {
        Caveat::new(CHALLENGE_CONDITION, format!("c0ffee:{pubkey}:"))
    }

    #[test]
    fn expiration_final_compares_with_now() {
        let mut ctx = SatisfierContext::new(10_000);

        assert!(ExpirationSatisfier.satisfy_final(&Caveat::expiration(10_000), &mut ctx));
        assert!(ExpirationSatisfier.satisfy_final(&Caveat::expiration(10_001), &mut ctx));
        assert!(!ExpirationSatisfier.satisfy_final(&Caveat::expiration(9_999), &mut ctx));
    }

    #[test]
    fn expiration_rejects_non_numeric_values() {
        let mut ctx = SatisfierContext::new(0);
        let bogus = Caveat::new(EXPIRATION_CONDITION, "tomorrow");

        assert!(!ExpirationSatisfier.satisfy_final(&bogus, &mut ctx));
        assert!(!ExpirationSatisfier.satisfy_previous(&Caveat::expiration(5), &bogus, &ctx));
    }

    #[test]
    fn expiration_rejects_foreign_conditions() {
        let ctx = SatisfierContext::new(0);
        let route = Caveat::new(ROUTE_CONDITION, "5");
        assert!(!ExpirationSatisfier.satisfy_previous(&Caveat::expiration(10), &route, &ctx));
    }

    #[test]
    fn expiration_equal_values_are_not_widening() {
        let ctx = SatisfierContext::new(0);
        assert!(ExpirationSatisfier.satisfy_previous(
            &Caveat::expiration(7),
            &Caveat::expiration(7),
            &ctx
        ));
    }

    #[test]
    fn origin_matches_resolved_client() {
        let caveat = Caveat::new(ORIGIN_CONDITION, "203.0.113.9");
        let mut forwarded = SatisfierContext::new(0)
            .with_forwarded_for("203.0.113.9, 10.0.0.2")
            .with_remote_addr("10.0.0.2:443");
        let mut direct = SatisfierContext::new(0).with_remote_addr("198.51.100.1:443");
        let mut unknown = SatisfierContext::new(0);

        assert!(OriginSatisfier.satisfy_final(&caveat, &mut forwarded));
        assert!(!OriginSatisfier.satisfy_final(&caveat, &mut direct));
        assert!(!OriginSatisfier.satisfy_final(&caveat, &mut unknown));
    }

    #[test]
    fn origin_rejects_invalid_caveat_value() {
        let mut ctx = SatisfierContext::new(0).with_remote_addr("10.0.0.1");
        let caveat = Caveat::new(ORIGIN_CONDITION, "localhost");
        assert!(!OriginSatisfier.satisfy_final(&caveat, &mut ctx));
    }

    #[test]
    fn origin_forbids_any_change() {
        let ctx = SatisfierContext::new(0);
        let a = Caveat::new(ORIGIN_CONDITION, "10.0.0.1");
        let b = Caveat::new(ORIGIN_CONDITION, "10.0.0.2");

        assert!(OriginSatisfier.satisfy_previous(&a, &a, &ctx));
        assert!(!OriginSatisfier.satisfy_previous(&a, &b, &ctx));
    }

    #[test]
    fn route_exact_and_master() {
        let mut ctx = SatisfierContext::new(0)
            .with_path("/videos/1")
            .with_master_route("*");

        assert!(RouteSatisfier.satisfy_final(&Caveat::new(ROUTE_CONDITION, "/videos/1"), &mut ctx));
        assert!(RouteSatisfier.satisfy_final(&Caveat::new(ROUTE_CONDITION, "*"), &mut ctx));
        assert!(!RouteSatisfier.satisfy_final(&Caveat::new(ROUTE_CONDITION, "/videos"), &mut ctx));
    }

    #[test]
    fn route_subroutes_respect_segment_boundaries() {
        let mut ctx = SatisfierContext::new(0)
            .with_path("/api/items/7")
            .with_allow_subroutes(true);

        assert!(RouteSatisfier.satisfy_final(&Caveat::new(ROUTE_CONDITION, "/api"), &mut ctx));
        assert!(RouteSatisfier.satisfy_final(&Caveat::new(ROUTE_CONDITION, "/api/"), &mut ctx));
        assert!(!RouteSatisfier.satisfy_final(&Caveat::new(ROUTE_CONDITION, "/ap"), &mut ctx));
        assert!(!RouteSatisfier.satisfy_final(&Caveat::new(ROUTE_CONDITION, "/other"), &mut ctx));
    }

    #[test]
    fn challenge_signature_roundtrip() {
        let (secret, pubkey) = node_key();
        let signed = sign_challenge(&unsigned(&pubkey), &secret).unwrap();
        let mut ctx = SatisfierContext::new(0);

        assert!(ChallengeSatisfier.satisfy_previous(&unsigned(&pubkey), &signed, &ctx));
        assert!(ChallengeSatisfier.satisfy_final(&signed, &mut ctx));
        // verifying a signed caveat never consumes the unsigned allowance
        assert!(ctx.claim_unsigned_challenge());
    }

    #[test]
    fn challenge_unsigned_accepted_once_per_run() {
        let (_, pubkey) = node_key();
        let caveat = unsigned(&pubkey);
        let mut ctx = SatisfierContext::new(0);

        assert!(ChallengeSatisfier.satisfy_final(&caveat, &mut ctx));
        assert!(!ChallengeSatisfier.satisfy_final(&caveat, &mut ctx));

        let mut next_run = SatisfierContext::new(0);
        assert!(ChallengeSatisfier.satisfy_final(&caveat, &mut next_run));
    }

    #[test]
    fn challenge_rejects_wrong_signer() {
        let (_, pubkey) = node_key();
        let other = SecretKey::from_slice(&[0x11; 32]).unwrap();

        assert!(matches!(
            sign_challenge(&unsigned(&pubkey), &other),
            Err(LsatError::VerificationFailed { .. })
        ));

        let secp = Secp256k1::new();
        let forged = secp.sign_ecdsa(&challenge_message("c0ffee"), &other);
        let caveat = Caveat::new(
            CHALLENGE_CONDITION,
            format!("c0ffee:{pubkey}:{}", hex::encode(forged.serialize_compact())),
        );
        assert!(!ChallengeSatisfier.satisfy_final(&caveat, &mut SatisfierContext::new(0)));
    }

    #[test]
    fn challenge_accepts_der_signatures() {
        let (secret, pubkey) = node_key();
        let secp = Secp256k1::new();
        let sig = secp.sign_ecdsa(&challenge_message("c0ffee"), &secret);
        let caveat = Caveat::new(
            CHALLENGE_CONDITION,
            format!("c0ffee:{pubkey}:{}", hex::encode(sig.serialize_der())),
        );

        assert!(ChallengeSatisfier.satisfy_final(&caveat, &mut SatisfierContext::new(0)));
    }

    #[test]
    fn challenge_previous_requires_same_binding_and_signature() {
        let (secret, pubkey) = node_key();
        let ctx = SatisfierContext::new(0);
        let first = unsigned(&pubkey);
        let signed = sign_challenge(&first, &secret).unwrap();
        let other_challenge = Caveat::new(CHALLENGE_CONDITION, format!("beef:{pubkey}:"));

        assert!(!ChallengeSatisfier.satisfy_previous(&first, &first, &ctx));
        assert!(!ChallengeSatisfier.satisfy_previous(&other_challenge, &signed, &ctx));
    }

    #[test]
    fn challenge_rejects_malformed_values() {
        for value in ["", "onlychallenge", "c0ffee:", ":pubkey:"] {
            let caveat = Caveat::new(CHALLENGE_CONDITION, value);
            let mut ctx = SatisfierContext::new(0);

            assert!(!ChallengeSatisfier.satisfy_final(&caveat, &mut ctx), "{value}");
            assert!(!ChallengeSatisfier.satisfy_previous(&caveat, &caveat, &ctx), "{value}");
        }

        let undecodable = Caveat::new(CHALLENGE_CONDITION, "c0ffee:zz:00");
        assert!(!ChallengeSatisfier.satisfy_final(&undecodable, &mut SatisfierContext::new(0)));
    }

    #[test]
    fn sign_challenge_rejects_other_conditions() {
        let (secret, _) = node_key();
        assert!(matches!(
            sign_challenge(&Caveat::new(ROUTE_CONDITION, "/a"), &secret),
            Err(LsatError::InvalidCaveat { .. })
        ));
    }
}
