//! Payment-driven authorization state machine.
//!
//! A request moves through these states:
//!
//! ```text
//! NoToken -> InvoicePending -> PaidAwaitingDischarge -> Authorized
//!                           \-> HeldAwaitingSettle   -/
//! ```
//!
//! Access is only granted when the root macaroon is presented together
//! with its discharge. The discharge carries the caveats produced by the
//! caveat getters and is signed under a key derived from the root key, so
//! the caveat-free root macaroon never passes as a discharge.
//!
//! `Expired` and `Invalid` are terminal for the request. An expired token is
//! recoverable: the caller drops its stored macaroons and the next request
//! starts over at `NoToken`. An invalid token is never replaced
//! automatically.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::caveat::Caveat;
use crate::config::PaywallConfig;
use crate::constants::{DISCHARGE_KEY_LABEL, WWW_AUTHENTICATE_HEADER};
use crate::error::LsatError;
use crate::getter::{CaveatContext, CaveatGetter};
use crate::identifier::Identifier;
use crate::invoice::{Invoice, InvoiceProvider, InvoiceRequest, InvoiceState, InvoiceStatus};
use crate::keys::RootKey;
use crate::lsat::{LsatToken, decode_preimage};
use crate::macaroon::{HmacMacaroon, Macaroon};
use crate::request::RequestContext;
use crate::satisfier::{SatisfierContext, SatisfierSet};
use crate::verification::verify_macaroons;

/// Where a request stands in the payment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
    /// No usable token was presented.
    NoToken,
    /// A token was presented but its invoice is not paid yet.
    InvoicePending,
    /// The invoice is paid and a discharge macaroon was just minted.
    PaidAwaitingDischarge,
    /// The invoice is held; access is provisional until it is settled.
    HeldAwaitingSettle,
    /// The token is paid for and every caveat is satisfied.
    Authorized,
    /// The token has expired.
    Expired,
    /// The token is invalid.
    Invalid,
}

impl AuthState {
    /// Returns the state's name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::InvoicePending => "invoice_pending",
            Self::PaidAwaitingDischarge => "paid_awaiting_discharge",
            Self::HeldAwaitingSettle => "held_awaiting_settle",
            Self::Authorized => "authorized",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly minted token and the invoice that pays for it.
#[derive(Debug, Clone)]
pub struct PaymentChallenge<M: Macaroon = HmacMacaroon> {
    /// The unpaid token; its root macaroon carries no caveats
    pub token: LsatToken<M>,
    /// The invoice created for it
    pub invoice: Invoice,
    /// `WWW-Authenticate` value: `LSAT <challenge>`
    pub header: String,
}

/// The paywall's decision for one request.
#[derive(Debug, Clone)]
pub enum Outcome<M: Macaroon = HmacMacaroon> {
    /// Pay the invoice in the challenge (402).
    PaymentRequired(PaymentChallenge<M>),
    /// The invoice is not paid yet; poll again later (402).
    AwaitingPayment {
        /// Invoice that was checked
        invoice_id: String,
        /// Status reported by the provider
        status: InvoiceStatus,
    },
    /// Payment confirmed; present `discharge` with the token from now on (200).
    Discharged {
        /// The discharge macaroon
        discharge: M,
        /// Caveats it carries
        caveats: Vec<Caveat>,
        /// Invoice state at discharge time
        state: InvoiceState,
    },
    /// Access granted (200).
    Authorized {
        /// The presented token
        token: LsatToken<M>,
        /// Every caveat that was verified, root first
        caveats: Vec<Caveat>,
        /// True while the invoice is only held, not settled
        provisional: bool,
    },
    /// Access refused (401 when expired, 400 otherwise).
    Rejected {
        /// Why the token was refused
        error: LsatError,
        /// `Expired` or `Invalid`
        state: AuthState,
        /// True if stored macaroons should be discarded
        clear_session: bool,
    },
}

impl<M: Macaroon> Outcome<M> {
    /// Returns the state the request ended in.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        match self {
            Self::PaymentRequired(_) => AuthState::NoToken,
            Self::AwaitingPayment { .. } => AuthState::InvoicePending,
            Self::Discharged {
                state: InvoiceState::Held,
                ..
            } => AuthState::HeldAwaitingSettle,
            Self::Discharged { .. } => AuthState::PaidAwaitingDischarge,
            Self::Authorized { .. } => AuthState::Authorized,
            Self::Rejected { state, .. } => *state,
        }
    }

    /// HTTP status code a transport layer should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::PaymentRequired(_) | Self::AwaitingPayment { .. } => 402,
            Self::Discharged { .. } | Self::Authorized { .. } => 200,
            Self::Rejected { error, .. } => error.status_code(),
        }
    }

    /// Returns true if the protected resource may be served.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }

    /// Returns the `WWW-Authenticate` value for a payment challenge.
    #[must_use]
    pub fn www_authenticate(&self) -> Option<&str> {
        match self {
            Self::PaymentRequired(challenge) => Some(challenge.header.as_str()),
            _ => None,
        }
    }

    /// Returns the header a transport layer should add to the response,
    /// as a `(name, value)` pair.
    #[must_use]
    pub fn response_header(&self) -> Option<(&'static str, &str)> {
        self.www_authenticate()
            .map(|value| (WWW_AUTHENTICATE_HEADER, value))
    }
}

/// Decides, per request, whether to challenge, wait, discharge, admit, or
/// reject.
///
/// # Example
///
/// ```
/// use lsat_paywall::{AuthState, Paywall, PaywallConfig, RequestContext, RootKey, SimulatedInvoiceProvider};
///
/// let provider = SimulatedInvoiceProvider::new();
/// let paywall = Paywall::new(PaywallConfig::new(RootKey::generate()), provider).unwrap();
///
/// // first contact: a 402 with an invoice
/// let outcome = paywall.authorize(&RequestContext::new("/data")).unwrap();
/// assert_eq!(outcome.status_code(), 402);
/// assert_eq!(outcome.state(), AuthState::NoToken);
/// assert!(outcome.www_authenticate().unwrap().starts_with("LSAT "));
/// ```
pub struct Paywall<P, M = HmacMacaroon> {
    config: PaywallConfig,
    discharge_key: RootKey,
    satisfiers: SatisfierSet,
    getters: Vec<Arc<dyn CaveatGetter>>,
    provider: P,
    macaroon: PhantomData<fn() -> M>,
}

impl<P: InvoiceProvider> Paywall<P> {
    /// Creates a paywall using the default macaroon backend.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidConfig` if the configuration is unusable.
    pub fn new(config: PaywallConfig, provider: P) -> Result<Self, LsatError> {
        Self::with_macaroon_backend(config, provider)
    }
}

impl<P: InvoiceProvider, M: Macaroon> Paywall<P, M> {
    /// Creates a paywall minting macaroons with backend `M`.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidConfig` if the configuration is unusable,
    /// or `LsatError::InvalidKeyFormat` if the discharge key cannot be
    /// derived.
    pub fn with_macaroon_backend(config: PaywallConfig, provider: P) -> Result<Self, LsatError> {
        config.validate()?;
        Ok(Self {
            discharge_key: config.root_key.derive(DISCHARGE_KEY_LABEL)?,
            satisfiers: config.satisfiers(),
            getters: config.caveat_getters(),
            config,
            provider,
            macaroon: PhantomData,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PaywallConfig {
        &self.config
    }

    /// Returns the invoice provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the satisfiers used for verification.
    #[must_use]
    pub const fn satisfiers(&self) -> &SatisfierSet {
        &self.satisfiers
    }

    /// Authorizes a request at the current time.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvoiceProvider` unmodified when the provider
    /// fails, and an error if a macaroon cannot be minted. Token problems
    /// are reported as [`Outcome::Rejected`], not as errors.
    pub fn authorize(&self, request: &RequestContext) -> Result<Outcome<M>, LsatError> {
        self.authorize_at(request, Utc::now())
    }

    /// Authorizes a request as of `now`.
    ///
    /// # Errors
    ///
    /// See [`Paywall::authorize`].
    pub fn authorize_at(
        &self,
        request: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<Outcome<M>, LsatError> {
        let Some(header) = request.authorization() else {
            return self.challenge(request, now).map(Outcome::PaymentRequired);
        };

        let token = match LsatToken::<M>::from_token(header) {
            Ok(token) => token,
            Err(
                err @ (LsatError::BadPreimageFormat
                | LsatError::PreimageMismatch { .. }
                | LsatError::PreimageAlreadySet),
            ) => return Ok(reject(err)),
            Err(err) => {
                debug!(%err, "unusable token, issuing a new challenge");
                return self.challenge(request, now).map(Outcome::PaymentRequired);
            }
        };

        let payment_hash = token.payment_hash();
        if request.invoice_id().is_some_and(|id| !id.eq_ignore_ascii_case(&payment_hash)) {
            return Ok(reject(LsatError::verification_failed(
                "invoice id does not match the token's payment hash",
            )));
        }

        let now_ms = now.timestamp_millis();
        if token.is_expired_at(now_ms) {
            return Ok(reject(LsatError::Expired {
                valid_until: token.valid_until(),
            }));
        }

        let mut ctx = self.satisfier_context(request, now_ms);
        if let Some(raw) = request.discharge() {
            return self.authorize_discharged(token, raw, &mut ctx);
        }
        self.discharge(&token, request, &mut ctx)
    }

    /// Creates an invoice and mints the unpaid token for it.
    ///
    /// The invoice amount is the requested amount, raised to `min_amount`.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvoiceProvider` if the invoice cannot be created,
    /// `LsatError::InvalidHex` or `LsatError::SizeMismatch` if the provider's
    /// invoice id is not a 32-byte hex payment hash, or an error if minting
    /// fails.
    pub fn challenge(
        &self,
        request: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<PaymentChallenge<M>, LsatError> {
        let amount = request.amount().max(self.config.min_amount);
        let invoice = self.provider.create_invoice(&InvoiceRequest {
            description: self.config.invoice_description.clone(),
            amount,
            expires_at: self.config.invoice_expires_at(now)?,
        })?;

        let identifier = Identifier::generate_for_hash_hex(&invoice.id)?;
        let macaroon = M::create(&self.config.location, &self.config.root_key, &identifier.encode())?;
        let token = LsatToken::from_macaroon(macaroon, Some(invoice.payment_request.clone()))?;
        let header = token.challenge_header()?;

        info!(payment_hash = %invoice.id, amount, "issued LSAT challenge");
        Ok(PaymentChallenge {
            token,
            invoice,
            header,
        })
    }

    /// Settles a held invoice by forwarding its preimage to the provider.
    ///
    /// # Errors
    ///
    /// - `LsatError::BadPreimageFormat` unless `preimage` is 64 hex characters
    /// - `LsatError::Unsupported` if hodl invoices are disabled
    /// - `LsatError::InvoiceProvider` with the provider's error, unmodified
    pub fn settle(&self, preimage: &str) -> Result<(), LsatError> {
        decode_preimage(preimage)?;
        if !self.config.hodl {
            return Err(LsatError::Unsupported {
                operation: "settling held invoices",
            });
        }
        self.provider.settle_held_invoice(preimage)?;
        info!("settled held invoice");
        Ok(())
    }

    /// Checks the invoice of a token presented without a discharge and, once
    /// it is paid or held, mints the discharge macaroon.
    ///
    /// A valid preimage proves payment, so the provider's state is not
    /// consulted for such a token; its status is still fetched for the
    /// amount the caveat getters see.
    fn discharge(
        &self,
        token: &LsatToken<M>,
        request: &RequestContext,
        ctx: &mut SatisfierContext,
    ) -> Result<Outcome<M>, LsatError> {
        let payment_hash = token.payment_hash();
        let mut status = self.provider.check_invoice_status(&payment_hash)?;
        if !token.is_pending() {
            status.state = InvoiceState::Paid;
        }
        if !self.is_payable_state(status.state) {
            debug!(%payment_hash, state = %status.state, "invoice not paid yet");
            return Ok(Outcome::AwaitingPayment {
                invoice_id: payment_hash,
                status,
            });
        }

        let root = [(token.macaroon(), &self.config.root_key)];
        if let Err(err) = verify_macaroons(&root, &self.satisfiers, ctx) {
            return Ok(reject(err));
        }

        let caveat_ctx = CaveatContext {
            now_ms: ctx.now_ms(),
            path: request.path().to_string(),
            client_ip: ctx.client_ip(),
            amount_paid: status.amount,
            payment_hash: payment_hash.clone(),
            invoice_state: status.state,
            node_pubkey: request.node_pubkey().map(str::to_string),
        };
        let caveats: Vec<Caveat> = self
            .getters
            .iter()
            .flat_map(|getter| getter.caveats(&caveat_ctx))
            .collect();

        let identifier = token.macaroon().identifier();
        let mut discharge = M::create(&self.config.location, &self.discharge_key, identifier)?;
        for caveat in &caveats {
            discharge.add_first_party_caveat(&caveat.encode())?;
        }

        info!(
            %payment_hash,
            state = %status.state,
            caveats = caveats.len(),
            "minted discharge macaroon"
        );
        Ok(Outcome::Discharged {
            discharge,
            caveats,
            state: status.state,
        })
    }

    fn authorize_discharged(
        &self,
        token: LsatToken<M>,
        raw: &str,
        ctx: &mut SatisfierContext,
    ) -> Result<Outcome<M>, LsatError> {
        let discharge = match M::deserialize(raw) {
            Ok(discharge) => discharge,
            Err(err) => return Ok(reject(err.into())),
        };
        if discharge.identifier() != token.macaroon().identifier() {
            return Ok(reject(LsatError::verification_failed(
                "discharge macaroon was not minted for this token",
            )));
        }

        let caveats = match verify_macaroons(
            &[
                (token.macaroon(), &self.config.root_key),
                (&discharge, &self.discharge_key),
            ],
            &self.satisfiers,
            ctx,
        ) {
            Ok(caveats) => caveats,
            Err(err) => return Ok(reject(err)),
        };

        let payment_hash = token.payment_hash();
        if !token.is_pending() {
            info!(%payment_hash, "authorized by preimage and discharge");
            return Ok(Outcome::Authorized {
                token,
                caveats,
                provisional: false,
            });
        }

        let status = self.provider.check_invoice_status(&payment_hash)?;
        match status.state {
            InvoiceState::Paid => {
                info!(%payment_hash, "authorized by settled invoice");
                Ok(Outcome::Authorized {
                    token,
                    caveats,
                    provisional: false,
                })
            }
            InvoiceState::Held if self.config.hodl => {
                info!(%payment_hash, "provisionally authorized by held invoice");
                Ok(Outcome::Authorized {
                    token,
                    caveats,
                    provisional: true,
                })
            }
            _ => {
                debug!(%payment_hash, state = %status.state, "discharge presented before payment");
                Ok(Outcome::AwaitingPayment {
                    invoice_id: payment_hash,
                    status,
                })
            }
        }
    }

    const fn is_payable_state(&self, state: InvoiceState) -> bool {
        match state {
            InvoiceState::Paid => true,
            InvoiceState::Held => self.config.hodl,
            InvoiceState::Unpaid | InvoiceState::Processing => false,
        }
    }

    fn satisfier_context(&self, request: &RequestContext, now_ms: i64) -> SatisfierContext {
        let mut ctx = SatisfierContext::new(now_ms)
            .with_path(request.path())
            .with_allow_subroutes(self.config.allow_subroutes);
        if let Some(chain) = request.forwarded_for() {
            ctx = ctx.with_forwarded_for(chain);
        }
        if let Some(addr) = request.remote_addr() {
            ctx = ctx.with_remote_addr(addr);
        }
        if let Some(route) = &self.config.master_route {
            ctx = ctx.with_master_route(route.as_str());
        }
        ctx
    }
}

impl<P: fmt::Debug, M> fmt::Debug for Paywall<P, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paywall")
            .field("config", &self.config)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

fn reject<M: Macaroon>(error: LsatError) -> Outcome<M> {
    let expired = error.is_expired();
    if expired {
        info!(%error, "token expired, client must pay again");
    } else {
        warn!(%error, "token rejected");
    }
    Outcome::Rejected {
        state: if expired { AuthState::Expired } else { AuthState::Invalid },
        clear_session: expired,
        error,
    }
}
