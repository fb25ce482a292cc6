//! Settlement state per payment hash.
//!
//! Each entry only moves forward: `Pending -> Settled`, `Pending -> Expired`,
//! or straight to `Settled` when a settlement notification arrives before the
//! challenge was registered. A preimage that hashes to the payment hash is
//! proof of payment, so it also moves a locally expired entry to `Settled`.
//! A settled entry never reverts, so once any verifier observes `Settled`
//! every later verifier does too.
//!
//! Entries live in a sharded map; updates to one hash never block lookups of
//! another. Each entry owns a `watch` channel so callers can await the
//! transition out of `Pending`.

use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::types::{PaymentHash, Preimage};

/// Lifecycle of one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeState {
    Pending { deadline: u64 },
    Settled { preimage: Preimage },
    Expired,
}

impl ChallengeState {
    pub fn is_final(&self) -> bool {
        !matches!(self, ChallengeState::Pending { .. })
    }
}

/// Result of a settlement lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStatus {
    Pending,
    Settled(Preimage),
    Expired,
    Unknown,
}

struct Entry {
    state: watch::Sender<ChallengeState>,
    uses: u64,
    expired_at: Option<u64>,
}

impl Entry {
    fn new(state: ChallengeState) -> Self {
        let (tx, _) = watch::channel(state);
        Self {
            state: tx,
            uses: 0,
            expired_at: None,
        }
    }
}

/// Concurrent settlement table keyed by payment hash.
pub struct SettlementStore {
    entries: DashMap<PaymentHash, Entry>,
}

impl SettlementStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Track a freshly issued challenge. An existing entry is left untouched.
    pub fn register_pending(&self, hash: PaymentHash, deadline: u64) {
        self.entries
            .entry(hash)
            .or_insert_with(|| Entry::new(ChallengeState::Pending { deadline }));
    }

    /// Record a confirmed settlement.
    ///
    /// Returns `false` when the preimage does not hash to `hash`. Repeated
    /// notifications are accepted, and a late one overrides a local expiry.
    pub fn settle(&self, hash: PaymentHash, preimage: Preimage) -> bool {
        if !preimage.matches(&hash) {
            tracing::warn!(payment_hash = %hash, "settlement preimage does not match payment hash");
            return false;
        }

        match self.entries.entry(hash) {
            MapEntry::Vacant(v) => {
                v.insert(Entry::new(ChallengeState::Settled { preimage }));
                tracing::debug!(payment_hash = %hash, "settlement recorded before challenge registration");
                true
            }
            MapEntry::Occupied(mut o) => {
                let entry = o.get_mut();
                let current = entry.state.borrow().clone();
                match current {
                    ChallengeState::Pending { .. } => {
                        entry.state.send_replace(ChallengeState::Settled { preimage });
                        tracing::info!(payment_hash = %hash, "challenge settled");
                        true
                    }
                    ChallengeState::Settled { .. } => true,
                    ChallengeState::Expired => {
                        entry.state.send_replace(ChallengeState::Settled { preimage });
                        entry.expired_at = None;
                        tracing::warn!(payment_hash = %hash, "settlement arrived after local expiry");
                        true
                    }
                }
            }
        }
    }

    /// Move a pending entry to `Expired`. No effect on other states.
    pub fn expire(&self, hash: &PaymentHash, now: u64) {
        if let Some(mut entry) = self.entries.get_mut(hash) {
            if matches!(*entry.state.borrow(), ChallengeState::Pending { .. }) {
                entry.state.send_replace(ChallengeState::Expired);
                entry.expired_at = Some(now);
            }
        }
    }

    /// Stored state without applying expiry.
    pub fn peek(&self, hash: &PaymentHash) -> Option<ChallengeState> {
        self.entries.get(hash).map(|entry| entry.state.borrow().clone())
    }

    /// Current status, applying expiry when a pending deadline has passed.
    pub fn status(&self, hash: &PaymentHash, now: u64) -> SettlementStatus {
        let Some(mut entry) = self.entries.get_mut(hash) else {
            return SettlementStatus::Unknown;
        };
        let current = entry.state.borrow().clone();
        match current {
            ChallengeState::Pending { deadline } if now > deadline => {
                entry.state.send_replace(ChallengeState::Expired);
                entry.expired_at = Some(now);
                tracing::debug!(payment_hash = %hash, "challenge expired");
                SettlementStatus::Expired
            }
            ChallengeState::Pending { .. } => SettlementStatus::Pending,
            ChallengeState::Settled { preimage } => SettlementStatus::Settled(preimage),
            ChallengeState::Expired => SettlementStatus::Expired,
        }
    }

    /// Wait up to `timeout` for `hash` to leave `Pending`.
    pub async fn wait_settled(&self, hash: &PaymentHash, timeout: Duration) -> SettlementStatus {
        let mut rx = match self.entries.get(hash) {
            Some(entry) => entry.state.subscribe(),
            None => return SettlementStatus::Unknown,
        };

        let status = match tokio::time::timeout(timeout, rx.wait_for(ChallengeState::is_final)).await {
            Ok(Ok(state)) => match &*state {
                ChallengeState::Settled { preimage } => SettlementStatus::Settled(*preimage),
                ChallengeState::Expired => SettlementStatus::Expired,
                ChallengeState::Pending { .. } => SettlementStatus::Pending,
            },
            // Sender dropped: entry purged while waiting.
            Ok(Err(_)) => SettlementStatus::Unknown,
            Err(_) => SettlementStatus::Pending,
        };
        status
    }

    /// Atomically count one admitted use of a settled hash.
    ///
    /// With a `limit`, the use is refused once `limit` uses were counted.
    pub fn record_use(&self, hash: &PaymentHash, limit: Option<u32>) -> bool {
        let Some(mut entry) = self.entries.get_mut(hash) else {
            return false;
        };
        if !matches!(*entry.state.borrow(), ChallengeState::Settled { .. }) {
            return false;
        }
        if let Some(limit) = limit {
            if entry.uses >= u64::from(limit) {
                return false;
            }
        }
        entry.uses += 1;
        true
    }

    pub fn uses(&self, hash: &PaymentHash) -> u64 {
        self.entries.get(hash).map(|e| e.uses).unwrap_or(0)
    }

    /// Drop expired entries older than `retention_secs`, and pending ones
    /// whose deadline passed more than `retention_secs` ago.
    ///
    /// Settled entries are kept: they hold the use counts for capacity caveats.
    pub fn purge_expired(&self, now: u64, retention_secs: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let state = entry.state.borrow().clone();
            match state {
                ChallengeState::Settled { .. } => true,
                ChallengeState::Expired => entry
                    .expired_at
                    .is_none_or(|at| at.saturating_add(retention_secs) > now),
                ChallengeState::Pending { deadline } => deadline.saturating_add(retention_secs) > now,
            }
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SettlementStore {
    fn default() -> Self {
        Self::new()
    }
}
