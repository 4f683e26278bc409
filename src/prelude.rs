//! Convenient re-exports for glob imports.
//!
//! ```rust
//! use lsat_paywall::prelude::*;
//!
//! let caveat = Caveat::decode("route=/videos").unwrap();
//! assert_eq!(caveat.condition(), "route");
//! ```
//!
//! The simulated provider and the built-in satisfier types are left out;
//! import them from the crate root.

pub use crate::{
    // Tokens
    Caveat, Comparator, HmacMacaroon, Identifier, IdentifierVersion, Lsat, LsatToken, Macaroon,
    RootKey,
    // Verification
    CaveatContext, CaveatGetter, Satisfier, SatisfierContext, SatisfierSet, check_caveats,
    verify_caveats, verify_macaroons,
    // Payment flow
    AuthState, Invoice, InvoiceProvider, InvoiceRequest, InvoiceState, InvoiceStatus, Outcome,
    PaymentChallenge, Paywall, PaywallConfig, RequestContext,
    // Errors
    LsatError, MacaroonError, ProviderError,
};
