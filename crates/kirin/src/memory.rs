//! In-process payment backend for development mode and tests.
//!
//! Invoices are settled explicitly with [`MemoryInvoiceBackend::settle`],
//! which broadcasts to every active settlement subscription.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::backend::{Invoice, InvoiceBackend, InvoiceStatus, Settlement};
use crate::error::BackendError;
use crate::types::{PaymentHash, Preimage};

const BROADCAST_CAPACITY: usize = 1024;

struct StoredInvoice {
    preimage: Preimage,
    status: InvoiceStatus,
}

pub struct MemoryInvoiceBackend {
    invoices: DashMap<PaymentHash, StoredInvoice>,
    settlements: broadcast::Sender<Settlement>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    created: AtomicUsize,
}

impl MemoryInvoiceBackend {
    pub fn new() -> Self {
        let (settlements, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            invoices: DashMap::new(),
            settlements,
            unavailable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            created: AtomicUsize::new(0),
        }
    }

    /// Mark the invoice paid and broadcast the settlement.
    ///
    /// Returns the revealed preimage, or `None` for unknown or canceled invoices.
    pub fn settle(&self, hash: &PaymentHash) -> Option<Preimage> {
        let preimage = {
            let mut invoice = self.invoices.get_mut(hash)?;
            if invoice.status == InvoiceStatus::Canceled {
                return None;
            }
            invoice.status = InvoiceStatus::Settled(invoice.preimage);
            invoice.preimage
        };
        // No receivers is fine: lookups still see the settlement.
        let _ = self.settlements.send(Settlement {
            payment_hash: *hash,
            preimage,
        });
        Some(preimage)
    }

    /// Mark the invoice settled without notifying subscribers.
    pub fn settle_silently(&self, hash: &PaymentHash) -> Option<Preimage> {
        let mut invoice = self.invoices.get_mut(hash)?;
        if invoice.status == InvoiceStatus::Canceled {
            return None;
        }
        invoice.status = InvoiceStatus::Settled(invoice.preimage);
        Some(invoice.preimage)
    }

    pub fn cancel(&self, hash: &PaymentHash) {
        if let Some(mut invoice) = self.invoices.get_mut(hash) {
            if invoice.status == InvoiceStatus::Open {
                invoice.status = InvoiceStatus::Canceled;
            }
        }
    }

    /// Preimage of an issued invoice, paid or not.
    pub fn preimage(&self, hash: &PaymentHash) -> Option<Preimage> {
        self.invoices.get(hash).map(|i| i.preimage)
    }

    /// Make every call fail as if the node were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of invoices created so far.
    pub fn invoices_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    async fn simulate_network(&self) -> Result<(), BackendError> {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Request("connection refused".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryInvoiceBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvoiceBackend for MemoryInvoiceBackend {
    async fn create_invoice(&self, amount: u64, _memo: &str) -> Result<Invoice, BackendError> {
        self.simulate_network().await?;

        let preimage = Preimage::random();
        let payment_hash = preimage.payment_hash();
        self.invoices.insert(
            payment_hash,
            StoredInvoice {
                preimage,
                status: InvoiceStatus::Open,
            },
        );
        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(Invoice {
            payment_hash,
            payment_request: format!("lnbcrt{amount}n1p{}", payment_hash.to_hex()),
            amount,
        })
    }

    async fn lookup_invoice(&self, hash: &PaymentHash) -> Result<Option<InvoiceStatus>, BackendError> {
        self.simulate_network().await?;
        Ok(self.invoices.get(hash).map(|i| i.status.clone()))
    }

    async fn subscribe_settlements(
        &self,
    ) -> Result<BoxStream<'static, Result<Settlement, BackendError>>, BackendError> {
        self.simulate_network().await?;
        let rx = self.settlements.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(settlement) => return Some((Ok(settlement), rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "settlement subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
