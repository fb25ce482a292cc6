//! Payment backend interface.
//!
//! The proxy never talks to the Lightning network itself. It asks a backend
//! for invoices and listens for their settlement.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BackendError;
use crate::types::{PaymentHash, Preimage};

/// A freshly created invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub payment_hash: PaymentHash,
    /// BOLT-11 payment request handed to the client.
    pub payment_request: String,
    pub amount: u64,
}

/// Backend view of one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceStatus {
    Open,
    Settled(Preimage),
    Canceled,
}

/// Settlement notification carrying the revealed preimage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payment_hash: PaymentHash,
    pub preimage: Preimage,
}

/// Invoice creation and settlement notification.
///
/// `subscribe_settlements` delivers each settlement at least once; consumers
/// must tolerate duplicates and resubscribe when the stream ends.
#[async_trait]
pub trait InvoiceBackend: Send + Sync {
    async fn create_invoice(&self, amount: u64, memo: &str) -> Result<Invoice, BackendError>;

    /// `Ok(None)` when the backend has no invoice for `hash`.
    async fn lookup_invoice(&self, hash: &PaymentHash) -> Result<Option<InvoiceStatus>, BackendError>;

    async fn subscribe_settlements(
        &self,
    ) -> Result<BoxStream<'static, Result<Settlement, BackendError>>, BackendError>;
}
