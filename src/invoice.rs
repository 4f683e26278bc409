//! Invoice provider interface.
//!
//! The paywall never talks to a Lightning node directly. Everything it needs
//! from the payment side goes through [`InvoiceProvider`], which a host
//! application implements on top of its node or payment processor.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Opaque failure reported by an invoice provider.
///
/// The paywall passes these through untouched and never retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    /// Creates a provider error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the provider's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Parameters for a new invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InvoiceRequest {
    /// Human-readable memo
    pub description: String,
    /// Amount in satoshis
    pub amount: u64,
    /// When the invoice should stop being payable
    pub expires_at: DateTime<Utc>,
}

/// A newly created invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Invoice {
    /// Invoice id; the hex-encoded payment hash
    pub id: String,
    /// BOLT 11 payment request to hand to the payer
    pub payment_request: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Payment state of an invoice as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum InvoiceState {
    /// Not paid yet
    Unpaid,
    /// Payment is in flight
    Processing,
    /// Settled
    Paid,
    /// Accepted but held until the preimage is revealed (hodl invoice)
    Held,
}

impl InvoiceState {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Held => "held",
        }
    }
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InvoiceStatus {
    /// Payment state
    pub state: InvoiceState,
    /// Invoice amount in satoshis
    pub amount: u64,
    /// Hex preimage, once the provider knows it
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub preimage: Option<String>,
}

/// Creates, inspects, and settles invoices on behalf of the paywall.
///
/// Calls are blocking and made on the request path. The paywall imposes
/// no timeout or retry policy; that belongs to the implementation.
pub trait InvoiceProvider: Send + Sync {
    /// Creates an invoice.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the backend rejects or cannot reach the
    /// request.
    fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, ProviderError>;

    /// Looks up the status of invoice `id`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the invoice is unknown or the backend fails.
    fn check_invoice_status(&self, id: &str) -> Result<InvoiceStatus, ProviderError>;

    /// Settles a held invoice by revealing its preimage.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if no held invoice matches or settlement fails.
    fn settle_held_invoice(&self, preimage: &str) -> Result<(), ProviderError>;
}

impl<T: InvoiceProvider + ?Sized> InvoiceProvider for Arc<T> {
    fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, ProviderError> {
        (**self).create_invoice(request)
    }

    fn check_invoice_status(&self, id: &str) -> Result<InvoiceStatus, ProviderError> {
        (**self).check_invoice_status(id)
    }

    fn settle_held_invoice(&self, preimage: &str) -> Result<(), ProviderError> {
        (**self).settle_held_invoice(preimage)
    }
}

impl<T: InvoiceProvider + ?Sized> InvoiceProvider for &T {
    fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, ProviderError> {
        (**self).create_invoice(request)
    }

    fn check_invoice_status(&self, id: &str) -> Result<InvoiceStatus, ProviderError> {
        (**self).check_invoice_status(id)
    }

    fn settle_held_invoice(&self, preimage: &str) -> Result<(), ProviderError> {
        (**self).settle_held_invoice(preimage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_wire_names() {
        assert_eq!(InvoiceState::Unpaid.to_string(), "unpaid");
        assert_eq!(InvoiceState::Processing.to_string(), "processing");
        assert_eq!(InvoiceState::Paid.to_string(), "paid");
        assert_eq!(InvoiceState::Held.to_string(), "held");
    }

    #[test]
    fn provider_error_keeps_message() {
        let err = ProviderError::new("connection refused");
        assert_eq!(err.message(), "connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn status_serializes_lowercase() {
        let status = InvoiceStatus {
            state: InvoiceState::Held,
            amount: 10,
            preimage: None,
        };
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["state"], "held");
        assert!(json.get("preimage").is_none());
    }
}
