//! Transport-neutral view of an incoming request.

use crate::constants::{AUTHORIZATION_HEADER, FORWARDED_FOR_HEADER};

/// The parts of a request the paywall looks at.
///
/// Adapters for a web framework fill this in from the request's path,
/// peer address and headers, and from whatever session store holds the
/// discharge macaroon.
///
/// # Example
///
/// ```
/// use lsat_paywall::RequestContext;
///
/// let request = RequestContext::new("/videos/42")
///     .with_remote_addr("198.51.100.7:51234")
///     .with_amount(100);
///
/// assert_eq!(request.path(), "/videos/42");
/// assert!(request.authorization().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    path: String,
    remote_addr: Option<String>,
    forwarded_for: Option<String>,
    authorization: Option<String>,
    discharge: Option<String>,
    invoice_id: Option<String>,
    amount: u64,
    node_pubkey: Option<String>,
}

impl RequestContext {
    /// Creates a request for `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the peer address (`ip` or `ip:port`).
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Sets the `X-Forwarded-For` header value.
    #[must_use]
    pub fn with_forwarded_for(mut self, chain: impl Into<String>) -> Self {
        self.forwarded_for = Some(chain.into());
        self
    }

    /// Sets the `Authorization` header value.
    #[must_use]
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Sets the serialized discharge macaroon.
    #[must_use]
    pub fn with_discharge(mut self, discharge: impl Into<String>) -> Self {
        self.discharge = Some(discharge.into());
        self
    }

    /// Names the invoice to check, overriding the one in the token.
    #[must_use]
    pub fn with_invoice_id(mut self, id: impl Into<String>) -> Self {
        self.invoice_id = Some(id.into());
        self
    }

    /// Sets the requested invoice amount in satoshis.
    #[must_use]
    pub const fn with_amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    /// Copies a raw request header, if it is one the paywall reads.
    ///
    /// Header names match case-insensitively. Other headers are ignored, so
    /// an adapter can pass every header of the request through.
    #[must_use]
    pub fn with_header(self, name: &str, value: impl Into<String>) -> Self {
        if name.eq_ignore_ascii_case(AUTHORIZATION_HEADER) {
            self.with_authorization(value)
        } else if name.eq_ignore_ascii_case(FORWARDED_FOR_HEADER) {
            self.with_forwarded_for(value)
        } else {
            self
        }
    }

    /// Sets the hex public key of the node requesting access.
    #[must_use]
    pub fn with_node_pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.node_pubkey = Some(pubkey.into());
        self
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the peer address.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Returns the forwarded-for chain.
    #[must_use]
    pub fn forwarded_for(&self) -> Option<&str> {
        self.forwarded_for.as_deref()
    }

    /// Returns the `Authorization` header value.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Returns the serialized discharge macaroon.
    #[must_use]
    pub fn discharge(&self) -> Option<&str> {
        self.discharge.as_deref()
    }

    /// Returns the explicit invoice id.
    #[must_use]
    pub fn invoice_id(&self) -> Option<&str> {
        self.invoice_id.as_deref()
    }

    /// Returns the requested amount.
    #[must_use]
    pub const fn amount(&self) -> u64 {
        self.amount
    }

    /// Returns the node public key.
    #[must_use]
    pub fn node_pubkey(&self) -> Option<&str> {
        self.node_pubkey.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_headers_are_picked_up() {
        let request = RequestContext::new("/a")
            .with_header("authorization", "LSAT abc:")
            .with_header("X-FORWARDED-FOR", "203.0.113.9, 10.0.0.1")
            .with_header("Accept", "text/html");

        assert_eq!(request.authorization(), Some("LSAT abc:"));
        assert_eq!(request.forwarded_for(), Some("203.0.113.9, 10.0.0.1"));
        assert_eq!(request, RequestContext::new("/a")
            .with_authorization("LSAT abc:")
            .with_forwarded_for("203.0.113.9, 10.0.0.1"));
    }
}
