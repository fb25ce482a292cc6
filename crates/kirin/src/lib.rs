//! L402 protocol core for the kirin authenticating proxy.
//!
//! A client that reaches a priced service without a valid token receives a
//! payment challenge: a Lightning invoice plus a capability token bound to the
//! invoice's payment hash. Once the invoice is paid, the client presents the
//! token together with the payment preimage and is admitted.
//!
//! # Components
//!
//! - **Issuer** ([`Challenger`]): creates invoices through an [`InvoiceBackend`]
//!   and tracks their settlement in a [`SettlementStore`]
//! - **Minter/Verifier** ([`Minter`]): mints HMAC-chained tokens and verifies
//!   `(token, preimage)` pairs against signature, payment and caveats
//! - **Authenticator** ([`Authenticator`]): per-request state machine that
//!   either admits a request or produces a [`Challenge`]
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kirin::{Authenticator, AuthPolicy, Challenger, MemoryInvoiceBackend, Minter, RootKey};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MemoryInvoiceBackend::new());
//! let challenger = Arc::new(Challenger::new(backend, Default::default()));
//! let minter = Minter::new(Arc::new(RootKey::from_hex(&"ab".repeat(32))?), challenger.clone());
//! let auth = Authenticator::new(challenger, minter);
//!
//! let policy = AuthPolicy { service: "api", path_prefix: "/api", price: 100, caveats: &[] };
//! let outcome = auth.authenticate("/api/items", None, &policy).await;
//! # Ok(())
//! # }
//! ```

pub mod authenticator;
pub mod backend;
pub mod caveat;
pub mod challenger;
pub mod constants;
pub mod error;
pub mod hmac;
pub mod lnd;
pub mod memory;
pub mod minter;
pub mod settlement;
pub mod signer;
pub mod token;
pub mod types;

pub use authenticator::{
    parse_authorization, AuthOutcome, AuthPolicy, Admission, Authenticator, Challenge, Credential,
};
pub use backend::{Invoice, InvoiceBackend, InvoiceStatus, Settlement};
pub use caveat::{Caveat, CaveatTemplate, RequestContext};
pub use challenger::{Challenger, ChallengerConfig};
pub use constants::*;
pub use error::{BackendError, ChallengeError, DecodeError, EncodeError, KeyError, VerifyError};
pub use lnd::{LndConfig, LndRestBackend};
pub use memory::MemoryInvoiceBackend;
pub use minter::Minter;
pub use settlement::{ChallengeState, SettlementStatus, SettlementStore};
pub use signer::{RootKey, TokenSigner};
pub use token::{check_caveats, Identifier, Token};
pub use types::{PaymentHash, Preimage, TokenId};

/// Current unix time in seconds.
///
/// On clock error, returns `u64::MAX` so that expiry caveats and challenge
/// deadlines fail closed.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch - treating all deadlines as passed");
            u64::MAX
        })
}
