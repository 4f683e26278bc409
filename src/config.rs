//! Paywall configuration.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::DEFAULT_LOCATION;
use crate::error::LsatError;
use crate::getter::{CaveatGetter, ChallengeCaveatGetter, TimeCaveatGetter};
use crate::keys::RootKey;
use crate::satisfier::{Satisfier, SatisfierSet};

/// Configuration for a [`Paywall`](crate::Paywall).
///
/// Built once at startup and moved into the paywall. Nothing here is read
/// from the environment.
///
/// # Example
///
/// ```
/// use std::num::NonZeroU64;
/// use std::time::Duration;
/// use lsat_paywall::{PaywallConfig, RootKey, RouteCaveatGetter};
///
/// let config = PaywallConfig::new(RootKey::generate())
///     .with_min_amount(10)
///     .with_invoice_expiry(Duration::from_secs(600))
///     .with_time_caveat_rate(NonZeroU64::new(1).unwrap())
///     .with_caveat_getter(RouteCaveatGetter);
///
/// assert!(config.validate().is_ok());
/// // the time getter is prepended to the configured ones
/// assert_eq!(config.caveat_getters().len(), 2);
/// ```
#[derive(Clone)]
pub struct PaywallConfig {
    /// Signing key for every macaroon.
    pub root_key: RootKey,

    /// Location hint written into minted macaroons.
    ///
    /// Default: `"lsat"`
    pub location: String,

    /// Smallest invoice amount in satoshis; requests for less are raised.
    ///
    /// Default: 1
    pub min_amount: u64,

    /// Memo for created invoices.
    ///
    /// Default: `"LSAT access"`
    pub invoice_description: String,

    /// How long a created invoice stays payable.
    ///
    /// Default: 1 hour
    pub invoice_expiry: Duration,

    /// Whether held (hodl) invoices grant provisional access.
    ///
    /// Default: false
    pub hodl: bool,

    /// Whether node-bound challenge caveats are issued and enforced.
    ///
    /// Default: false
    pub oauth: bool,

    /// Satoshis per second of access; adds an expiration caveat when set.
    ///
    /// Default: None
    pub time_caveat_rate: Option<NonZeroU64>,

    /// Route caveat value that admits every path.
    ///
    /// Default: None
    pub master_route: Option<String>,

    /// Whether route caveats also admit sub-paths.
    ///
    /// Default: false
    pub allow_subroutes: bool,

    caveat_getters: Vec<Arc<dyn CaveatGetter>>,
    satisfiers: SatisfierSet,
}

impl PaywallConfig {
    /// Creates a configuration with defaults around `root_key`.
    #[must_use]
    pub fn new(root_key: RootKey) -> Self {
        Self {
            root_key,
            location: DEFAULT_LOCATION.to_string(),
            min_amount: 1,
            invoice_description: "LSAT access".to_string(),
            invoice_expiry: Duration::from_secs(3600),
            hodl: false,
            oauth: false,
            time_caveat_rate: None,
            master_route: None,
            allow_subroutes: false,
            caveat_getters: Vec::new(),
            satisfiers: SatisfierSet::new(),
        }
    }

    /// Sets the macaroon location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Sets the minimum invoice amount.
    #[must_use]
    pub const fn with_min_amount(mut self, min_amount: u64) -> Self {
        self.min_amount = min_amount;
        self
    }

    /// Sets the invoice memo.
    #[must_use]
    pub fn with_invoice_description(mut self, description: impl Into<String>) -> Self {
        self.invoice_description = description.into();
        self
    }

    /// Sets how long invoices stay payable.
    #[must_use]
    pub const fn with_invoice_expiry(mut self, expiry: Duration) -> Self {
        self.invoice_expiry = expiry;
        self
    }

    /// Enables or disables hodl invoices.
    #[must_use]
    pub const fn with_hodl(mut self, hodl: bool) -> Self {
        self.hodl = hodl;
        self
    }

    /// Enables or disables node-bound challenges.
    #[must_use]
    pub const fn with_oauth(mut self, oauth: bool) -> Self {
        self.oauth = oauth;
        self
    }

    /// Sets the per-second rate for time-based access.
    #[must_use]
    pub const fn with_time_caveat_rate(mut self, rate: NonZeroU64) -> Self {
        self.time_caveat_rate = Some(rate);
        self
    }

    /// Sets the master route.
    #[must_use]
    pub fn with_master_route(mut self, route: impl Into<String>) -> Self {
        self.master_route = Some(route.into());
        self
    }

    /// Enables or disables sub-route matching.
    #[must_use]
    pub const fn with_allow_subroutes(mut self, allow: bool) -> Self {
        self.allow_subroutes = allow;
        self
    }

    /// Appends a caveat getter.
    #[must_use]
    pub fn with_caveat_getter(mut self, getter: impl CaveatGetter + 'static) -> Self {
        self.caveat_getters.push(Arc::new(getter));
        self
    }

    /// Registers a custom satisfier. It replaces a built-in satisfier for
    /// the same condition.
    #[must_use]
    pub fn with_satisfier(mut self, satisfier: impl Satisfier + 'static) -> Self {
        self.satisfiers.register(satisfier);
        self
    }

    /// Returns the caveat getters in the order they run.
    ///
    /// The time getter (if a rate is set) comes first and the challenge
    /// getter (if `oauth` is on) comes last.
    #[must_use]
    pub fn caveat_getters(&self) -> Vec<Arc<dyn CaveatGetter>> {
        let mut getters: Vec<Arc<dyn CaveatGetter>> = Vec::with_capacity(self.caveat_getters.len() + 2);
        if let Some(rate) = self.time_caveat_rate {
            getters.push(Arc::new(TimeCaveatGetter::new(rate)));
        }
        getters.extend(self.caveat_getters.iter().cloned());
        if self.oauth {
            getters.push(Arc::new(ChallengeCaveatGetter));
        }
        getters
    }

    /// Returns the satisfiers used for verification: the built-ins
    /// overlaid with the custom ones.
    #[must_use]
    pub fn satisfiers(&self) -> SatisfierSet {
        let mut set = SatisfierSet::builtin(self.oauth);
        set.overlay(&self.satisfiers);
        set
    }

    /// Returns when an invoice created at `now` stops being payable.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidConfig` if the expiry is out of range.
    pub fn invoice_expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, LsatError> {
        chrono::Duration::from_std(self.invoice_expiry)
            .ok()
            .and_then(|expiry| now.checked_add_signed(expiry))
            .ok_or_else(|| LsatError::InvalidConfig {
                reason: format!("invoice expiry {:?} is out of range", self.invoice_expiry),
            })
    }

    /// Checks the configuration for values the paywall cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `LsatError::InvalidConfig` describing the first problem.
    pub fn validate(&self) -> Result<(), LsatError> {
        if self.min_amount == 0 {
            return Err(LsatError::InvalidConfig {
                reason: "min_amount must be at least 1 satoshi".to_string(),
            });
        }
        if self.invoice_expiry.is_zero() {
            return Err(LsatError::InvalidConfig {
                reason: "invoice_expiry must be positive".to_string(),
            });
        }
        self.invoice_expires_at(Utc::now()).map(|_| ())
    }
}

impl fmt::Debug for PaywallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaywallConfig")
            .field("root_key", &self.root_key)
            .field("location", &self.location)
            .field("min_amount", &self.min_amount)
            .field("invoice_description", &self.invoice_description)
            .field("invoice_expiry", &self.invoice_expiry)
            .field("hodl", &self.hodl)
            .field("oauth", &self.oauth)
            .field("time_caveat_rate", &self.time_caveat_rate)
            .field("master_route", &self.master_route)
            .field("allow_subroutes", &self.allow_subroutes)
            .field("caveat_getters", &self.caveat_getters.len())
            .field("satisfiers", &self.satisfiers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caveat::Caveat;
    use crate::getter::{CaveatContext, RouteCaveatGetter};
    use crate::invoice::InvoiceState;
    use crate::satisfier::SatisfierContext;

    struct AlwaysFresh;

    impl Satisfier for AlwaysFresh {
        fn condition(&self) -> &str {
            "expiration"
        }

        fn satisfy_final(&self, _caveat: &Caveat, _ctx: &mut SatisfierContext) -> bool {
            true
        }
    }

    fn ctx() -> CaveatContext {
        CaveatContext {
            now_ms: 0,
            path: "/a".to_string(),
            client_ip: None,
            amount_paid: 5,
            payment_hash: String::new(),
            invoice_state: InvoiceState::Paid,
            node_pubkey: Some("02ff".to_string()),
        }
    }

    #[test]
    fn default_config() {
        let config = PaywallConfig::new(RootKey::generate());

        assert_eq!(config.location, "lsat");
        assert_eq!(config.min_amount, 1);
        assert_eq!(config.invoice_description, "LSAT access");
        assert_eq!(config.invoice_expiry, Duration::from_secs(3600));
        assert!(!config.hodl);
        assert!(!config.oauth);
        assert!(config.time_caveat_rate.is_none());
        assert!(config.master_route.is_none());
        assert!(!config.allow_subroutes);
        assert!(config.caveat_getters().is_empty());
        assert_eq!(config.satisfiers().len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = PaywallConfig::new(RootKey::generate())
            .with_location("https://api.example.com")
            .with_min_amount(50)
            .with_invoice_description("premium article")
            .with_invoice_expiry(Duration::from_secs(60))
            .with_hodl(true)
            .with_oauth(true)
            .with_master_route("*")
            .with_allow_subroutes(true);

        assert_eq!(config.location, "https://api.example.com");
        assert_eq!(config.min_amount, 50);
        assert_eq!(config.invoice_description, "premium article");
        assert_eq!(config.invoice_expiry, Duration::from_secs(60));
        assert!(config.hodl);
        assert!(config.oauth);
        assert_eq!(config.master_route.as_deref(), Some("*"));
        assert!(config.allow_subroutes);
        assert!(config.satisfiers().contains("challenge"));
    }

    #[test]
    fn getters_are_normalized_in_order() {
        let config = PaywallConfig::new(RootKey::generate())
            .with_oauth(true)
            .with_caveat_getter(RouteCaveatGetter)
            .with_time_caveat_rate(NonZeroU64::new(1).unwrap());

        let produced: Vec<String> = config
            .caveat_getters()
            .iter()
            .flat_map(|g| g.caveats(&ctx()))
            .map(|c| c.condition().to_string())
            .collect();

        assert_eq!(produced, vec!["expiration", "route", "challenge"]);
    }

    #[test]
    fn custom_satisfier_replaces_builtin() {
        let config = PaywallConfig::new(RootKey::generate()).with_satisfier(AlwaysFresh);
        let satisfiers = config.satisfiers();

        assert_eq!(satisfiers.len(), 3);
        let expiration = satisfiers.get("expiration").unwrap();
        let mut sctx = SatisfierContext::new(i64::MAX);
        assert!(expiration.satisfy_final(&Caveat::expiration(0), &mut sctx));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let zero_amount = PaywallConfig::new(RootKey::generate()).with_min_amount(0);
        assert!(matches!(zero_amount.validate(), Err(LsatError::InvalidConfig { .. })));

        let zero_expiry = PaywallConfig::new(RootKey::generate()).with_invoice_expiry(Duration::ZERO);
        assert!(matches!(zero_expiry.validate(), Err(LsatError::InvalidConfig { .. })));

        let huge_expiry = PaywallConfig::new(RootKey::generate()).with_invoice_expiry(Duration::MAX);
        assert!(matches!(huge_expiry.validate(), Err(LsatError::InvalidConfig { .. })));
    }

    #[test]
    fn debug_hides_root_key() {
        let key = RootKey::from_bytes(&[0xcd; 32]).unwrap();
        let debug_output = format!("{:?}", PaywallConfig::new(key));

        assert!(debug_output.contains("PaywallConfig"));
        assert!(!debug_output.contains("cdcd"));
    }
}
