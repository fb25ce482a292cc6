//! Per-request authentication: admit, challenge or reject.

use std::sync::Arc;

use crate::backend::Invoice;
use crate::caveat::{Caveat, CaveatTemplate};
use crate::challenger::Challenger;
use crate::constants::{AUTH_SCHEME, LEGACY_AUTH_SCHEME};
use crate::error::{ChallengeError, EncodeError, VerifyError};
use crate::minter::Minter;
use crate::token::Token;
use crate::types::{PaymentHash, Preimage, TokenId};
use crate::unix_now;

/// Price and caveat policy of the route a request matched.
#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy<'a> {
    pub service: &'a str,
    pub path_prefix: &'a str,
    /// Zero means the route is free.
    pub price: u64,
    pub caveats: &'a [CaveatTemplate],
}

/// A payment challenge: an invoice and the token that unlocks once it is paid.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub invoice: Invoice,
    pub token: Token,
}

impl Challenge {
    /// Value of the `WWW-Authenticate` header.
    pub fn header_value(&self) -> String {
        format!(
            "{AUTH_SCHEME} macaroon=\"{}\", invoice=\"{}\"",
            self.token.encode(),
            self.invoice.payment_request
        )
    }
}

/// Identity of an admitted token, forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub token_id: TokenId,
    pub payment_hash: PaymentHash,
    pub caveats: Vec<Caveat>,
}

#[derive(Debug)]
pub enum AuthOutcome {
    /// A valid paid token was presented.
    Admitted(Admission),
    /// The route is free; no token was consulted.
    Free,
    /// Payment is required before the request can proceed.
    Challenge(Challenge),
    /// The presented credentials are invalid.
    Rejected(VerifyError),
    /// The payment backend could not be reached.
    Unavailable(String),
    /// The route's caveats cannot be encoded into a token.
    Misconfigured(EncodeError),
}

/// Credentials taken from an `Authorization` header.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: Token,
    /// `None` when the preimage is not 32 bytes of hex.
    pub preimage: Option<Preimage>,
}

/// Extract the token and preimage from an `Authorization` header value.
///
/// Returns `None` when the header is not an L402 credential at all, and
/// `Some(Err(_))` when the token cannot be decoded. A malformed preimage is
/// kept as `None` so the token's signature is still checked first.
pub fn parse_authorization(header: &str) -> Option<Result<Credential, VerifyError>> {
    let (scheme, credentials) = header.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case(AUTH_SCHEME) && !scheme.eq_ignore_ascii_case(LEGACY_AUTH_SCHEME) {
        return None;
    }
    let (token, preimage) = credentials.trim().split_once(':')?;
    if token.is_empty() || preimage.is_empty() {
        return None;
    }

    let token = match Token::decode(token) {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable token presented");
            return Some(Err(VerifyError::InvalidSignature));
        }
    };
    let preimage = preimage
        .parse::<Preimage>()
        .map_err(|e| tracing::debug!(error = %e, "undecodable preimage presented"))
        .ok();
    Some(Ok(Credential { token, preimage }))
}

pub struct Authenticator {
    challenger: Arc<Challenger>,
    minter: Minter,
}

impl Authenticator {
    pub fn new(challenger: Arc<Challenger>, minter: Minter) -> Self {
        Self { challenger, minter }
    }

    pub fn challenger(&self) -> &Arc<Challenger> {
        &self.challenger
    }

    pub fn minter(&self) -> &Minter {
        &self.minter
    }

    /// Decide what to do with a request to `path` carrying the given
    /// `Authorization` header.
    pub async fn authenticate(
        &self,
        path: &str,
        authorization: Option<&str>,
        policy: &AuthPolicy<'_>,
    ) -> AuthOutcome {
        if policy.price == 0 {
            return AuthOutcome::Free;
        }

        let Some(parsed) = authorization.and_then(parse_authorization) else {
            return self.challenge(policy).await;
        };
        let Credential { token, preimage } = match parsed {
            Ok(credential) => credential,
            Err(e) => return AuthOutcome::Rejected(e),
        };
        let Some(preimage) = preimage else {
            let e = if self.minter.signature_valid(&token) {
                VerifyError::SecretMismatch
            } else {
                VerifyError::InvalidSignature
            };
            tracing::info!(service = policy.service, reason = e.reason(), "token rejected");
            return AuthOutcome::Rejected(e);
        };

        match self
            .minter
            .verify(&token, &preimage, path, policy.service)
            .await
        {
            Ok(caveats) => {
                tracing::debug!(token_id = %token.token_id(), service = policy.service, "token admitted");
                AuthOutcome::Admitted(Admission {
                    token_id: token.token_id(),
                    payment_hash: token.payment_hash(),
                    caveats,
                })
            }
            Err(VerifyError::NotSettled) => {
                tracing::debug!(payment_hash = %token.payment_hash(), "token not settled, issuing new challenge");
                self.challenge(policy).await
            }
            Err(VerifyError::BackendUnavailable(reason)) => AuthOutcome::Unavailable(reason),
            Err(e) => {
                tracing::info!(
                    token_id = %token.token_id(),
                    service = policy.service,
                    reason = e.reason(),
                    "token rejected"
                );
                AuthOutcome::Rejected(e)
            }
        }
    }

    /// Issue a new challenge for `policy`, binding its caveat templates to the route.
    pub async fn challenge(&self, policy: &AuthPolicy<'_>) -> AuthOutcome {
        let invoice = match self.challenger.request_challenge(policy.price).await {
            Ok(invoice) => invoice,
            Err(ChallengeError::BackendUnavailable(reason)) => return AuthOutcome::Unavailable(reason),
            Err(e) => return AuthOutcome::Unavailable(e.to_string()),
        };

        let now = unix_now();
        let caveats = policy
            .caveats
            .iter()
            .map(|t| t.instantiate(policy.service, policy.path_prefix, now))
            .collect();
        match self.minter.mint(invoice.payment_hash, caveats) {
            Ok(token) => AuthOutcome::Challenge(Challenge { invoice, token }),
            Err(e) => {
                tracing::error!(service = policy.service, error = %e, "cannot mint token for route");
                AuthOutcome::Misconfigured(e)
            }
        }
    }
}
