//! LSAT (Lightning Service Authentication Token) paywall core.
//!
//! This crate implements the token side of an HTTP 402 paywall: minting
//! macaroons bound to a Lightning invoice, parsing the `LSAT` authorization
//! scheme, checking first-party caveats, and driving a request through the
//! payment state machine.
//!
//! # Overview
//!
//! A token is a macaroon whose identifier commits to an invoice's payment
//! hash, presented together with the invoice preimage:
//!
//! ```text
//! Authorization: LSAT <base64 macaroon>:<hex preimage>
//! ```
//!
//! Once the invoice is paid the paywall mints a discharge macaroon carrying
//! the caveats for this purchase. Access needs both macaroons.
//!
//! Caveats are `condition<comparator>value` strings. Each condition is
//! checked by a [`Satisfier`]; caveats may only narrow as they are added.
//!
//! # Quick Start
//!
//! ```rust
//! use lsat_paywall::{
//!     Macaroon, Outcome, Paywall, PaywallConfig, RequestContext, RootKey, SimulatedInvoiceProvider,
//! };
//!
//! let config = PaywallConfig::new(RootKey::from_bytes(&[7; 32]).unwrap()).with_min_amount(10);
//! let paywall = Paywall::new(config, SimulatedInvoiceProvider::new()).unwrap();
//!
//! // First request: no token, so a challenge comes back.
//! let outcome = paywall.authorize(&RequestContext::new("/data")).unwrap();
//! let Outcome::PaymentRequired(challenge) = outcome else { panic!() };
//! assert_eq!(challenge.invoice.id, challenge.token.payment_hash());
//!
//! // The client pays and learns the preimage.
//! let provider = paywall.provider();
//! provider.mark_paid(&challenge.invoice.id).unwrap();
//! let preimage = provider.preimage(&challenge.invoice.id).unwrap();
//!
//! let mut token = challenge.token;
//! token.add_preimage(&preimage).unwrap();
//! let request = RequestContext::new("/data").with_authorization(token.to_token());
//!
//! // Proof of payment earns the discharge macaroon.
//! let outcome = paywall.authorize(&request).unwrap();
//! let Outcome::Discharged { discharge, .. } = outcome else { panic!() };
//!
//! let request = request.with_discharge(discharge.serialize());
//! assert!(paywall.authorize(&request).unwrap().is_authorized());
//! ```
//!
//! # Caveats
//!
//! | Condition | Value | Checked against |
//! |-----------|-------|-----------------|
//! | `expiration` | ms since epoch | current time |
//! | `ip` | IP address | client address |
//! | `route` | path | request path |
//! | `challenge` | `challenge:pubkey:signature` | node signature |
//!
//! Custom conditions are added by registering a [`Satisfier`] on
//! [`PaywallConfig`].

#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod builtin;
mod caveat;
mod config;
pub mod constants;
mod error;
mod getter;
mod identifier;
mod invoice;
mod keys;
mod lsat;
mod macaroon;
mod paywall;
pub mod prelude;
mod request;
mod satisfier;
mod simulation;
mod verification;

pub use builtin::{
    ChallengeSatisfier, ExpirationSatisfier, OriginSatisfier, RouteSatisfier, sign_challenge,
};
pub use caveat::{Caveat, Comparator, expiration_from_caveats};
pub use config::PaywallConfig;
pub use error::{LsatError, MacaroonError};
pub use getter::{
    CaveatContext, CaveatGetter, ChallengeCaveatGetter, OriginCaveatGetter, RouteCaveatGetter,
    TimeCaveatGetter,
};
pub use identifier::{Identifier, IdentifierVersion};
pub use invoice::{
    Invoice, InvoiceProvider, InvoiceRequest, InvoiceState, InvoiceStatus, ProviderError,
};
pub use keys::{ROOT_KEY_SIZE, RootKey};
pub use lsat::{Lsat, LsatToken};
pub use macaroon::{CaveatChecker, HmacMacaroon, Macaroon};
pub use paywall::{AuthState, Outcome, PaymentChallenge, Paywall};
pub use request::RequestContext;
pub use satisfier::{Satisfier, SatisfierContext, SatisfierSet};
pub use simulation::SimulatedInvoiceProvider;
pub use verification::{
    CaveatFailure, FailureStage, check_caveats, verify_caveats, verify_macaroons,
};
