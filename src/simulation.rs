//! Simulated invoice provider for tests and demos.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::invoice::{Invoice, InvoiceProvider, InvoiceRequest, InvoiceState, InvoiceStatus, ProviderError};

#[derive(Debug, Clone)]
struct SimulatedInvoice {
    preimage: String,
    amount: u64,
    state: InvoiceState,
}

/// In-memory invoice provider.
///
/// Stands in for a Lightning node: every invoice gets a random preimage and
/// its SHA-256 as id, and payment is simulated with [`mark_paid`] and
/// [`mark_held`].
///
/// # Thread Safety
///
/// Uses `RwLock` for interior mutability, allowing concurrent reads
/// and exclusive writes.
///
/// [`mark_paid`]: SimulatedInvoiceProvider::mark_paid
/// [`mark_held`]: SimulatedInvoiceProvider::mark_held
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use lsat_paywall::{InvoiceProvider, InvoiceRequest, InvoiceState, SimulatedInvoiceProvider};
///
/// let provider = SimulatedInvoiceProvider::new();
/// let invoice = provider
///     .create_invoice(&InvoiceRequest {
///         description: "demo".to_string(),
///         amount: 10,
///         expires_at: Utc::now(),
///     })
///     .unwrap();
///
/// provider.mark_paid(&invoice.id).unwrap();
/// let status = provider.check_invoice_status(&invoice.id).unwrap();
/// assert_eq!(status.state, InvoiceState::Paid);
/// assert_eq!(status.preimage, provider.preimage(&invoice.id));
/// ```
#[derive(Debug, Default)]
pub struct SimulatedInvoiceProvider {
    invoices: RwLock<HashMap<String, SimulatedInvoice>>,
    settle_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl SimulatedInvoiceProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an invoice as settled.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the invoice is unknown.
    pub fn mark_paid(&self, id: &str) -> Result<(), ProviderError> {
        self.set_state(id, InvoiceState::Paid)
    }

    /// Marks an invoice as accepted but held.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the invoice is unknown.
    pub fn mark_held(&self, id: &str) -> Result<(), ProviderError> {
        self.set_state(id, InvoiceState::Held)
    }

    /// Marks a payment as in flight.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the invoice is unknown.
    pub fn mark_processing(&self, id: &str) -> Result<(), ProviderError> {
        self.set_state(id, InvoiceState::Processing)
    }

    /// Returns the preimage of an invoice, as the payer would learn it.
    #[must_use]
    pub fn preimage(&self, id: &str) -> Option<String> {
        self.invoices
            .read()
            .ok()?
            .get(id)
            .map(|invoice| invoice.preimage.clone())
    }

    /// Returns how many times settlement was requested.
    #[must_use]
    pub fn settle_calls(&self) -> usize {
        self.settle_calls.load(Ordering::SeqCst)
    }

    /// Makes every provider call fail while `unavailable` is true.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of invoices created.
    #[must_use]
    pub fn invoice_count(&self) -> usize {
        self.invoices.read().map_or(0, |invoices| invoices.len())
    }

    fn ensure_available(&self) -> Result<(), ProviderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::new("simulated node unavailable"));
        }
        Ok(())
    }

    fn set_state(&self, id: &str, state: InvoiceState) -> Result<(), ProviderError> {
        let mut invoices = self.invoices.write().map_err(|_| poisoned())?;
        let invoice = invoices.get_mut(id).ok_or_else(|| unknown(id))?;
        invoice.state = state;
        Ok(())
    }
}

impl InvoiceProvider for SimulatedInvoiceProvider {
    fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, ProviderError> {
        self.ensure_available()?;

        let preimage: [u8; 32] = rand::random();
        let id = hex::encode(Sha256::digest(preimage));
        let payment_request = format!("lnsim{}n1{}", request.amount, &id[..20]);

        self.invoices.write().map_err(|_| poisoned())?.insert(
            id.clone(),
            SimulatedInvoice {
                preimage: hex::encode(preimage),
                amount: request.amount,
                state: InvoiceState::Unpaid,
            },
        );
        debug!(payment_hash = %id, amount = request.amount, "simulated invoice created");

        Ok(Invoice {
            id,
            payment_request,
            created_at: Utc::now(),
        })
    }

    fn check_invoice_status(&self, id: &str) -> Result<InvoiceStatus, ProviderError> {
        self.ensure_available()?;

        let invoices = self.invoices.read().map_err(|_| poisoned())?;
        let invoice = invoices.get(id).ok_or_else(|| unknown(id))?;
        Ok(InvoiceStatus {
            state: invoice.state,
            amount: invoice.amount,
            preimage: (invoice.state == InvoiceState::Paid).then(|| invoice.preimage.clone()),
        })
    }

    fn settle_held_invoice(&self, preimage: &str) -> Result<(), ProviderError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let bytes = hex::decode(preimage).map_err(|e| ProviderError::new(format!("invalid preimage: {e}")))?;
        let id = hex::encode(Sha256::digest(bytes));

        let mut invoices = self.invoices.write().map_err(|_| poisoned())?;
        match invoices.get_mut(&id) {
            Some(invoice) if invoice.state == InvoiceState::Held => {
                invoice.state = InvoiceState::Paid;
                Ok(())
            }
            _ => Err(ProviderError::new(format!("no held invoice with payment hash {id}"))),
        }
    }
}

fn poisoned() -> ProviderError {
    ProviderError::new("simulated invoice store lock poisoned")
}

fn unknown(id: &str) -> ProviderError {
    ProviderError::new(format!("unknown invoice {id}"))
}
