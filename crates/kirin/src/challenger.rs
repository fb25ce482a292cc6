//! Challenge issuer: invoice creation and settlement tracking.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::backend::{Invoice, InvoiceBackend, InvoiceStatus};
use crate::constants::{
    DEFAULT_BACKEND_TIMEOUT_SECS, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_INVOICE_MEMO,
    DEFAULT_RETENTION_SECS,
};
use crate::error::{BackendError, ChallengeError};
use crate::settlement::{ChallengeState, SettlementStatus, SettlementStore};
use crate::types::PaymentHash;
use crate::unix_now;

const MIN_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ChallengerConfig {
    /// Memo placed on every invoice.
    pub memo: String,
    /// How long an unpaid challenge stays payable.
    pub challenge_ttl: Duration,
    /// Bound on each payment backend call.
    pub backend_timeout: Duration,
    /// How long expired challenges are remembered.
    pub retention: Duration,
}

impl Default for ChallengerConfig {
    fn default() -> Self {
        Self {
            memo: DEFAULT_INVOICE_MEMO.to_string(),
            challenge_ttl: Duration::from_secs(DEFAULT_CHALLENGE_TTL_SECS),
            backend_timeout: Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

/// Issues payment challenges and observes their settlement.
pub struct Challenger {
    backend: Arc<dyn InvoiceBackend>,
    store: SettlementStore,
    config: ChallengerConfig,
}

impl Challenger {
    pub fn new(backend: Arc<dyn InvoiceBackend>, config: ChallengerConfig) -> Self {
        Self {
            backend,
            store: SettlementStore::new(),
            config,
        }
    }

    pub fn store(&self) -> &SettlementStore {
        &self.store
    }

    pub fn config(&self) -> &ChallengerConfig {
        &self.config
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, ChallengeError> {
        match tokio::time::timeout(self.config.backend_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(op, error = %e, "payment backend call failed");
                Err(ChallengeError::BackendUnavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(op, timeout = ?self.config.backend_timeout, "payment backend call timed out");
                Err(ChallengeError::BackendUnavailable(format!("{op} timed out")))
            }
        }
    }

    /// Create one new invoice for `amount` and start tracking it as pending.
    pub async fn request_challenge(&self, amount: u64) -> Result<Invoice, ChallengeError> {
        if amount == 0 {
            return Err(ChallengeError::InvalidAmount(amount));
        }

        let invoice = self
            .bounded(
                "create_invoice",
                self.backend.create_invoice(amount, &self.config.memo),
            )
            .await?;

        let deadline = unix_now().saturating_add(self.config.challenge_ttl.as_secs());
        self.store.register_pending(invoice.payment_hash, deadline);
        tracing::debug!(payment_hash = %invoice.payment_hash, amount, "challenge issued");
        Ok(invoice)
    }

    /// Settlement status of `hash`.
    ///
    /// Final local states are returned directly. Otherwise the backend is
    /// asked before any deadline is applied, so neither a missed notification
    /// nor a local expiry racing a real payment hides a settlement.
    pub async fn check_settlement(&self, hash: &PaymentHash) -> Result<SettlementStatus, ChallengeError> {
        let local = self.store.peek(hash);
        match local {
            Some(ChallengeState::Settled { preimage }) => return Ok(SettlementStatus::Settled(preimage)),
            Some(ChallengeState::Expired) => return Ok(SettlementStatus::Expired),
            Some(ChallengeState::Pending { .. }) | None => {}
        }

        let remote = self
            .bounded("lookup_invoice", self.backend.lookup_invoice(hash))
            .await?;

        match remote {
            Some(InvoiceStatus::Settled(preimage)) => {
                self.store.settle(*hash, preimage);
                Ok(self.store.status(hash, unix_now()))
            }
            Some(InvoiceStatus::Canceled) => {
                self.store.expire(hash, unix_now());
                Ok(SettlementStatus::Expired)
            }
            Some(InvoiceStatus::Open) if local.is_none() => Ok(SettlementStatus::Pending),
            Some(InvoiceStatus::Open) | None => Ok(self.store.status(hash, unix_now())),
        }
    }

    /// Wait up to `timeout` for a tracked challenge to settle or expire.
    pub async fn wait_for_settlement(&self, hash: &PaymentHash, timeout: Duration) -> SettlementStatus {
        self.store.wait_settled(hash, timeout).await
    }

    /// Consume the backend's settlement stream until the task is aborted,
    /// resubscribing with capped exponential backoff.
    pub fn spawn_settlement_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = MIN_RESUBSCRIBE_BACKOFF;
            loop {
                match this
                    .bounded("subscribe_settlements", this.backend.subscribe_settlements())
                    .await
                {
                    Ok(mut stream) => {
                        tracing::info!("subscribed to settlement notifications");
                        backoff = MIN_RESUBSCRIBE_BACKOFF;
                        while let Some(item) = stream.next().await {
                            match item {
                                Ok(settlement) => {
                                    this.store.settle(settlement.payment_hash, settlement.preimage);
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "settlement stream error");
                                    break;
                                }
                            }
                        }
                        tracing::warn!("settlement stream ended, resubscribing");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, backoff = ?backoff, "settlement subscription failed");
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_RESUBSCRIBE_BACKOFF);
            }
        })
    }

    /// Periodically drop expired challenges past the retention window.
    pub fn spawn_purge_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = this
                    .store
                    .purge_expired(unix_now(), this.config.retention.as_secs());
                if purged > 0 {
                    tracing::info!(purged, "purged expired challenges");
                }
            }
        })
    }
}
