//! Caveat chain verification.
//!
//! [`check_caveats`] is the ordering-aware algorithm: caveats are grouped by
//! condition (oldest first), each consecutive pair in a group goes through
//! the satisfier's ordering check, and the newest caveat of the group goes
//! through its terminal check. Conditions without a registered satisfier are
//! skipped. [`verify_macaroons`] first checks the HMAC chains of the
//! macaroons that carry the caveats, then runs the same algorithm.
//!
//! # Failure classification
//!
//! | Failure | Error |
//! |---------|-------|
//! | newest numeric `expiration` is in the past | `LsatError::Expired` |
//! | any other caveat failure | `LsatError::VerificationFailed` |
//! | bad signature, third-party caveat | `LsatError::VerificationFailed` |
//! | undecodable caveat text | `LsatError::InvalidCaveat` |

use std::fmt;

use tracing::debug;

use crate::caveat::Caveat;
use crate::constants::EXPIRATION_CONDITION;
use crate::error::{LsatError, MacaroonError};
use crate::keys::RootKey;
use crate::macaroon::Macaroon;
use crate::satisfier::{SatisfierContext, SatisfierSet};

/// Which satisfier check rejected a caveat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The ordering check between a caveat and its predecessor.
    Previous,
    /// The terminal check of the newest caveat.
    Final,
}

/// The caveat that failed verification and the check that rejected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaveatFailure {
    /// The rejected caveat
    pub caveat: Caveat,
    /// The check that rejected it
    pub stage: FailureStage,
}

impl CaveatFailure {
    /// Returns true if this failure means the token has expired.
    ///
    /// Only a terminal check of a numeric `expiration` caveat counts;
    /// widening an expiration is tampering, not expiry.
    #[must_use]
    pub fn is_expiry(&self) -> bool {
        self.stage == FailureStage::Final
            && self.caveat.condition() == EXPIRATION_CONDITION
            && self.caveat.numeric_value().is_some()
    }

    /// Converts the failure into the error reported to callers.
    #[must_use]
    pub fn into_error(self) -> LsatError {
        match self.caveat.numeric_value() {
            Some(valid_until) if self.is_expiry() => LsatError::Expired { valid_until },
            _ => LsatError::verification_failed(self.to_string()),
        }
    }
}

impl fmt::Display for CaveatFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            FailureStage::Previous => write!(
                f,
                "caveat '{}' widens an earlier caveat of the same condition",
                self.caveat
            ),
            FailureStage::Final => write!(f, "caveat '{}' not satisfied", self.caveat),
        }
    }
}

/// Runs the satisfier checks over an ordered caveat chain.
///
/// # Errors
///
/// Returns the first `CaveatFailure` encountered. Groups are checked in
/// order of their condition's first appearance.
pub fn check_caveats(
    caveats: &[Caveat],
    satisfiers: &SatisfierSet,
    ctx: &mut SatisfierContext,
) -> Result<(), CaveatFailure> {
    let mut groups: Vec<(&str, Vec<&Caveat>)> = Vec::new();
    for caveat in caveats {
        match groups.iter_mut().find(|(cond, _)| *cond == caveat.condition()) {
            Some((_, group)) => group.push(caveat),
            None => groups.push((caveat.condition(), vec![caveat])),
        }
    }

    for (condition, group) in groups {
        let Some(satisfier) = satisfiers.get(condition) else {
            debug!(condition, "no satisfier registered, skipping caveats");
            continue;
        };

        for pair in group.windows(2) {
            if !satisfier.satisfy_previous(pair[0], pair[1], ctx) {
                return Err(CaveatFailure {
                    caveat: pair[1].clone(),
                    stage: FailureStage::Previous,
                });
            }
        }

        let Some(&last) = group.last() else {
            continue;
        };
        if !satisfier.satisfy_final(last, ctx) {
            return Err(CaveatFailure {
                caveat: last.clone(),
                stage: FailureStage::Final,
            });
        }
    }

    Ok(())
}

/// Returns true if every registered condition in `caveats` is satisfied.
///
/// # Example
///
/// ```
/// use lsat_paywall::{verify_caveats, Caveat, ExpirationSatisfier, SatisfierContext, SatisfierSet};
///
/// let satisfiers = SatisfierSet::new().with(ExpirationSatisfier);
/// let now = 1_700_000_000_000;
/// let narrowing = [Caveat::expiration(now + 1000), Caveat::expiration(now + 500)];
/// let widening = [Caveat::expiration(now + 500), Caveat::expiration(now + 1000)];
///
/// assert!(verify_caveats(&narrowing, &satisfiers, &mut SatisfierContext::new(now)));
/// assert!(!verify_caveats(&widening, &satisfiers, &mut SatisfierContext::new(now)));
/// ```
#[must_use]
pub fn verify_caveats(
    caveats: &[Caveat],
    satisfiers: &SatisfierSet,
    ctx: &mut SatisfierContext,
) -> bool {
    check_caveats(caveats, satisfiers, ctx).is_ok()
}

/// Verifies a root macaroon and its discharges, then the combined caveats.
///
/// Each macaroon is paired with the key it must have been signed under.
/// Signature checks only decode the caveats; every satisfier runs once,
/// afterwards, when the caveats of all macaroons (root first) go through
/// [`check_caveats`]. Returns the combined caveats.
///
/// # Errors
///
/// See the module documentation for how failures are classified.
pub fn verify_macaroons<M: Macaroon>(
    macaroons: &[(&M, &RootKey)],
    satisfiers: &SatisfierSet,
    ctx: &mut SatisfierContext,
) -> Result<Vec<Caveat>, LsatError> {
    let mut caveats = Vec::new();

    for &(macaroon, key) in macaroons {
        let mut undecodable = None;
        let result = macaroon.verify(key, &mut |predicate| match Caveat::decode(predicate) {
            Ok(caveat) => {
                caveats.push(caveat);
                true
            }
            Err(err) => {
                undecodable = Some(err);
                false
            }
        });

        match (result, undecodable) {
            (Ok(()), _) => {}
            (Err(MacaroonError::CaveatNotSatisfied { .. }), Some(err)) => return Err(err),
            (Err(err @ MacaroonError::Crypto { .. }), _) => return Err(err.into()),
            (Err(err), _) => {
                debug!(%err, "macaroon signature rejected");
                return Err(LsatError::verification_failed(err.to_string()));
            }
        }
    }

    check_caveats(&caveats, satisfiers, ctx).map_err(|failure| {
        debug!(%failure, "caveat chain rejected");
        failure.into_error()
    })?;

    Ok(caveats)
}
