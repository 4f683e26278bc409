//! Caveat getters: produce the caveats attached to a discharge macaroon.

use std::net::IpAddr;
use std::num::NonZeroU64;

use crate::caveat::Caveat;
use crate::constants::{CHALLENGE_CONDITION, ORIGIN_CONDITION, ROUTE_CONDITION};
use crate::invoice::InvoiceState;

/// What a caveat getter knows about the request that paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaveatContext {
    /// Current time in milliseconds since the epoch
    pub now_ms: i64,
    /// Request path
    pub path: String,
    /// Resolved client address, if any
    pub client_ip: Option<IpAddr>,
    /// Amount the invoice was paid with, in satoshis
    pub amount_paid: u64,
    /// Hex payment hash of the invoice
    pub payment_hash: String,
    /// Invoice state at discharge time (`Paid` or `Held`)
    pub invoice_state: InvoiceState,
    /// Hex public key of the node the token is bound to, if any
    pub node_pubkey: Option<String>,
}

/// Produces caveats for a newly paid token.
///
/// Any `Fn(&CaveatContext) -> Vec<Caveat>` closure is a getter.
///
/// # Example
///
/// ```
/// use lsat_paywall::{Caveat, CaveatContext, CaveatGetter, InvoiceState};
///
/// let tier = |ctx: &CaveatContext| {
///     let level = if ctx.amount_paid >= 1_000 { "gold" } else { "basic" };
///     vec![Caveat::new("tier", level)]
/// };
///
/// let ctx = CaveatContext {
///     now_ms: 0,
///     path: "/".to_string(),
///     client_ip: None,
///     amount_paid: 1_500,
///     payment_hash: String::new(),
///     invoice_state: InvoiceState::Paid,
///     node_pubkey: None,
/// };
/// assert_eq!(tier.caveats(&ctx), vec![Caveat::new("tier", "gold")]);
/// ```
pub trait CaveatGetter: Send + Sync {
    /// Returns the caveats to attach, in order.
    fn caveats(&self, ctx: &CaveatContext) -> Vec<Caveat>;
}

impl<F> CaveatGetter for F
where
    F: Fn(&CaveatContext) -> Vec<Caveat> + Send + Sync,
{
    fn caveats(&self, ctx: &CaveatContext) -> Vec<Caveat> {
        self(ctx)
    }
}

/// Grants time proportional to the amount paid.
///
/// Each satoshi buys `1 / rate` seconds of access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCaveatGetter {
    rate: NonZeroU64,
}

impl TimeCaveatGetter {
    /// Creates a getter charging `rate` satoshis per second.
    #[must_use]
    pub const fn new(rate: NonZeroU64) -> Self {
        Self { rate }
    }

    /// Returns the rate in satoshis per second.
    #[must_use]
    pub const fn rate(&self) -> NonZeroU64 {
        self.rate
    }

    /// Returns how many milliseconds `amount` satoshis buy.
    #[must_use]
    pub fn duration_ms(&self, amount: u64) -> i64 {
        let ms = amount.saturating_mul(1000) / self.rate.get();
        i64::try_from(ms).unwrap_or(i64::MAX)
    }
}

impl CaveatGetter for TimeCaveatGetter {
    fn caveats(&self, ctx: &CaveatContext) -> Vec<Caveat> {
        let until = ctx.now_ms.saturating_add(self.duration_ms(ctx.amount_paid));
        vec![Caveat::expiration(until)]
    }
}

/// Pins the token to the paying client's address.
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginCaveatGetter;

impl CaveatGetter for OriginCaveatGetter {
    fn caveats(&self, ctx: &CaveatContext) -> Vec<Caveat> {
        ctx.client_ip
            .map(|ip| Caveat::new(ORIGIN_CONDITION, ip.to_string()))
            .into_iter()
            .collect()
    }
}

/// Restricts the token to the path that was paid for.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteCaveatGetter;

impl CaveatGetter for RouteCaveatGetter {
    fn caveats(&self, ctx: &CaveatContext) -> Vec<Caveat> {
        if ctx.path.is_empty() {
            return Vec::new();
        }
        vec![Caveat::new(ROUTE_CONDITION, ctx.path.clone())]
    }
}

/// Issues an unsigned node challenge when the request names a node key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChallengeCaveatGetter;

impl CaveatGetter for ChallengeCaveatGetter {
    fn caveats(&self, ctx: &CaveatContext) -> Vec<Caveat> {
        let Some(pubkey) = &ctx.node_pubkey else {
            return Vec::new();
        };
        let challenge: [u8; 32] = rand::random();
        vec![Caveat::new(
            CHALLENGE_CONDITION,
            format!("{}:{pubkey}:", hex::encode(challenge)),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CaveatContext {
        CaveatContext {
            now_ms: 1_000_000,
            path: "/articles/1".to_string(),
            client_ip: Some("203.0.113.5".parse().unwrap()),
            amount_paid: 30,
            payment_hash: "00".repeat(32),
            invoice_state: InvoiceState::Paid,
            node_pubkey: None,
        }
    }

    #[test]
    fn time_getter_scales_with_amount() {
        let getter = TimeCaveatGetter::new(NonZeroU64::new(2).unwrap());

        // 30 sats at 2 sats/s buys 15 seconds
        assert_eq!(getter.caveats(&ctx()), vec![Caveat::expiration(1_015_000)]);
        assert_eq!(getter.duration_ms(0), 0);
        assert_eq!(getter.duration_ms(u64::MAX), i64::MAX);
    }

    #[test]
    fn origin_getter_uses_client_ip() {
        assert_eq!(
            OriginCaveatGetter.caveats(&ctx()),
            vec![Caveat::new("ip", "203.0.113.5")]
        );

        let anonymous = CaveatContext {
            client_ip: None,
            ..ctx()
        };
        assert!(OriginCaveatGetter.caveats(&anonymous).is_empty());
    }

    #[test]
    fn route_getter_uses_path() {
        assert_eq!(
            RouteCaveatGetter.caveats(&ctx()),
            vec![Caveat::new("route", "/articles/1")]
        );
    }

    #[test]
    fn challenge_getter_requires_node_key() {
        assert!(ChallengeCaveatGetter.caveats(&ctx()).is_empty());

        let bound = CaveatContext {
            node_pubkey: Some("02abcd".to_string()),
            ..ctx()
        };
        let caveats = ChallengeCaveatGetter.caveats(&bound);
        assert_eq!(caveats.len(), 1);

        let parts: Vec<&str> = caveats[0].value().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 64);
        assert_eq!(parts[1], "02abcd");
        assert_eq!(parts[2], "");
    }

    #[test]
    fn closures_are_getters() {
        let getter: Box<dyn CaveatGetter> =
            Box::new(|ctx: &CaveatContext| vec![Caveat::new("hash", ctx.payment_hash.clone())]);
        assert_eq!(getter.caveats(&ctx())[0].value(), "00".repeat(32));
    }
}
