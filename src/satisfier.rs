//! Pluggable per-condition caveat verification.
//!
//! A [`Satisfier`] owns one caveat condition. It is consulted twice: once for
//! every consecutive pair of caveats with its condition (ordering check) and
//! once for the newest caveat of that condition (terminal check). Satisfiers
//! are registered in a [`SatisfierSet`] at configuration time and are never
//! mutated afterwards; anything that varies per request lives in the
//! [`SatisfierContext`] handed to each call.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::builtin::{ChallengeSatisfier, ExpirationSatisfier, OriginSatisfier, RouteSatisfier};
use crate::caveat::Caveat;

/// Verification logic for a single caveat condition.
///
/// Implementations must be stateless: two requests verified concurrently
/// share the same satisfier instance.
///
/// # Example
///
/// ```
/// use lsat_paywall::{Caveat, Satisfier, SatisfierContext};
///
/// struct Tier;
///
/// impl Satisfier for Tier {
///     fn condition(&self) -> &str {
///         "tier"
///     }
///
///     fn satisfy_final(&self, caveat: &Caveat, _ctx: &mut SatisfierContext) -> bool {
///         caveat.value() == "gold"
///     }
/// }
///
/// let mut ctx = SatisfierContext::new(0);
/// assert!(Tier.satisfy_final(&Caveat::new("tier", "gold"), &mut ctx));
/// // without an ordering rule any sequence is accepted
/// assert!(Tier.satisfy_previous(
///     &Caveat::new("tier", "gold"),
///     &Caveat::new("tier", "silver"),
///     &ctx,
/// ));
/// ```
pub trait Satisfier: Send + Sync {
    /// The caveat condition this satisfier is responsible for.
    fn condition(&self) -> &str;

    /// Checks that `curr` is at least as restrictive as `prev`.
    ///
    /// Both caveats carry this satisfier's condition and `prev` was added
    /// before `curr`. The default places no ordering constraint.
    fn satisfy_previous(&self, prev: &Caveat, curr: &Caveat, ctx: &SatisfierContext) -> bool {
        let _ = (prev, curr, ctx);
        true
    }

    /// Checks the newest caveat of this condition against the request.
    fn satisfy_final(&self, caveat: &Caveat, ctx: &mut SatisfierContext) -> bool;
}

impl<T: Satisfier + ?Sized> Satisfier for Arc<T> {
    fn condition(&self) -> &str {
        (**self).condition()
    }

    fn satisfy_previous(&self, prev: &Caveat, curr: &Caveat, ctx: &SatisfierContext) -> bool {
        (**self).satisfy_previous(prev, curr, ctx)
    }

    fn satisfy_final(&self, caveat: &Caveat, ctx: &mut SatisfierContext) -> bool {
        (**self).satisfy_final(caveat, ctx)
    }
}

/// Request-scoped inputs for one verification run.
///
/// Create a fresh context per run. Besides the request view it holds the
/// challenge progress of the run, so it must never be shared between
/// requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SatisfierContext {
    now_ms: i64,
    path: String,
    forwarded_for: Option<String>,
    remote_addr: Option<String>,
    master_route: Option<String>,
    allow_subroutes: bool,
    unsigned_challenge_claimed: bool,
}

impl SatisfierContext {
    /// Creates a context evaluated at `now_ms` (milliseconds since the epoch).
    #[must_use]
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms,
            ..Self::default()
        }
    }

    /// Creates a context evaluated at the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::new(chrono::Utc::now().timestamp_millis())
    }

    /// Sets the request path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the raw `X-Forwarded-For` chain.
    #[must_use]
    pub fn with_forwarded_for(mut self, forwarded_for: impl Into<String>) -> Self {
        self.forwarded_for = Some(forwarded_for.into());
        self
    }

    /// Sets the direct connection address (`ip` or `ip:port`).
    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }

    /// Sets the route value that matches every path.
    #[must_use]
    pub fn with_master_route(mut self, master_route: impl Into<String>) -> Self {
        self.master_route = Some(master_route.into());
        self
    }

    /// Enables prefix matching of route caveats.
    #[must_use]
    pub const fn with_allow_subroutes(mut self, allow: bool) -> Self {
        self.allow_subroutes = allow;
        self
    }

    /// Returns the evaluation time in milliseconds.
    #[must_use]
    pub const fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the master route, if configured.
    #[must_use]
    pub fn master_route(&self) -> Option<&str> {
        self.master_route.as_deref()
    }

    /// Returns true if route caveats may match sub-paths.
    #[must_use]
    pub const fn allow_subroutes(&self) -> bool {
        self.allow_subroutes
    }

    /// Resolves the client address.
    ///
    /// The first entry of the forwarded-for chain wins when present;
    /// otherwise the direct connection address is used. Returns `None` if
    /// the chosen value is not a valid IP address.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        if let Some(chain) = &self.forwarded_for {
            return chain.split(',').next().and_then(parse_addr);
        }
        self.remote_addr.as_deref().and_then(parse_addr)
    }

    /// Claims the single unsigned challenge allowed per verification run.
    ///
    /// Returns true the first time it is called on this context and false
    /// on every later call.
    pub fn claim_unsigned_challenge(&mut self) -> bool {
        !std::mem::replace(&mut self.unsigned_challenge_claimed, true)
    }
}

fn parse_addr(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Registry of satisfiers, at most one per condition.
///
/// Registration order is kept; registering a condition twice replaces the
/// earlier satisfier in place.
#[derive(Clone, Default)]
pub struct SatisfierSet {
    satisfiers: Vec<Arc<dyn Satisfier>>,
}

impl SatisfierSet {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in satisfiers.
    ///
    /// `expiration`, `ip` and `route` are always present; `challenge` is
    /// added when `oauth` is true.
    #[must_use]
    pub fn builtin(oauth: bool) -> Self {
        let mut set = Self::new()
            .with(ExpirationSatisfier)
            .with(OriginSatisfier)
            .with(RouteSatisfier);
        if oauth {
            set.register(ChallengeSatisfier);
        }
        set
    }

    /// Registers a satisfier, replacing any existing one for its condition.
    pub fn register(&mut self, satisfier: impl Satisfier + 'static) {
        self.register_arc(Arc::new(satisfier));
    }

    /// Registers a shared satisfier, replacing any existing one for its
    /// condition.
    pub fn register_arc(&mut self, satisfier: Arc<dyn Satisfier>) {
        match self
            .satisfiers
            .iter_mut()
            .find(|s| s.condition() == satisfier.condition())
        {
            Some(slot) => *slot = satisfier,
            None => self.satisfiers.push(satisfier),
        }
    }

    /// Builder form of [`SatisfierSet::register`].
    #[must_use]
    pub fn with(mut self, satisfier: impl Satisfier + 'static) -> Self {
        self.register(satisfier);
        self
    }

    /// Registers every satisfier of `other`, replacing on conflict.
    pub fn overlay(&mut self, other: &Self) {
        for satisfier in &other.satisfiers {
            self.register_arc(Arc::clone(satisfier));
        }
    }

    /// Returns the satisfier for `condition`, if registered.
    #[must_use]
    pub fn get(&self, condition: &str) -> Option<&dyn Satisfier> {
        self.satisfiers
            .iter()
            .find(|s| s.condition() == condition)
            .map(|s| &**s)
    }

    /// Returns true if `condition` has a satisfier.
    #[must_use]
    pub fn contains(&self, condition: &str) -> bool {
        self.get(condition).is_some()
    }

    /// Returns the registered conditions in registration order.
    pub fn conditions(&self) -> impl Iterator<Item = &str> {
        self.satisfiers.iter().map(|s| s.condition())
    }

    /// Returns the number of registered satisfiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.satisfiers.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.satisfiers.is_empty()
    }
}

impl fmt::Debug for SatisfierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.conditions()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, bool);

    impl Satisfier for Fixed {
        fn condition(&self) -> &str {
            self.0
        }

        fn satisfy_final(&self, _caveat: &Caveat, _ctx: &mut SatisfierContext) -> bool {
            self.1
        }
    }

    #[test]
    fn builtin_conditions() {
        let plain: Vec<_> = SatisfierSet::builtin(false).conditions().map(str::to_string).collect();
        assert_eq!(plain, vec!["expiration", "ip", "route"]);

        let oauth = SatisfierSet::builtin(true);
        assert!(oauth.contains("challenge"));
        assert_eq!(oauth.len(), 4);
    }

    #[test]
    fn register_replaces_same_condition() {
        let mut set = SatisfierSet::new().with(Fixed("tier", false)).with(Fixed("plan", true));
        set.register(Fixed("tier", true));

        assert_eq!(set.len(), 2);
        let mut ctx = SatisfierContext::new(0);
        let tier = set.get("tier").unwrap();
        assert!(tier.satisfy_final(&Caveat::new("tier", "x"), &mut ctx));
        assert_eq!(set.conditions().collect::<Vec<_>>(), vec!["tier", "plan"]);
    }

    #[test]
    fn overlay_replaces_builtins() {
        let mut set = SatisfierSet::builtin(false);
        set.overlay(&SatisfierSet::new().with(Fixed("expiration", true)).with(Fixed("tier", true)));

        assert_eq!(set.len(), 4);
        let mut ctx = SatisfierContext::new(i64::MAX);
        let expiration = set.get("expiration").unwrap();
        assert!(expiration.satisfy_final(&Caveat::expiration(0), &mut ctx));
    }

    #[test]
    fn default_ordering_accepts_anything() {
        let ctx = SatisfierContext::new(0);
        assert!(Fixed("a", false).satisfy_previous(&Caveat::new("a", "1"), &Caveat::new("a", "2"), &ctx));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let ctx = SatisfierContext::new(0)
            .with_forwarded_for("203.0.113.7, 10.0.0.1")
            .with_remote_addr("10.0.0.1:4000");
        assert_eq!(ctx.client_ip(), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn client_ip_falls_back_to_remote_addr() {
        let ctx = SatisfierContext::new(0).with_remote_addr("192.0.2.1:8080");
        assert_eq!(ctx.client_ip(), Some("192.0.2.1".parse().unwrap()));

        let ctx = SatisfierContext::new(0).with_remote_addr("::1");
        assert_eq!(ctx.client_ip(), Some("::1".parse().unwrap()));
    }

    #[test]
    fn client_ip_rejects_garbage() {
        assert_eq!(SatisfierContext::new(0).client_ip(), None);
        let ctx = SatisfierContext::new(0)
            .with_forwarded_for("unknown")
            .with_remote_addr("192.0.2.1");
        assert_eq!(ctx.client_ip(), None);
    }

    #[test]
    fn unsigned_challenge_claimed_once() {
        let mut ctx = SatisfierContext::new(0);
        assert!(ctx.claim_unsigned_challenge());
        assert!(!ctx.claim_unsigned_challenge());

        let mut fresh = SatisfierContext::new(0);
        assert!(fresh.claim_unsigned_challenge());
    }

    #[test]
    fn debug_lists_conditions() {
        let set = SatisfierSet::builtin(false);
        assert_eq!(format!("{set:?}"), r#"["expiration", "ip", "route"]"#);
    }
}
