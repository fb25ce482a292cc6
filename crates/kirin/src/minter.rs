//! Token minting and verification.

use std::sync::Arc;

use crate::caveat::{Caveat, RequestContext};
use crate::challenger::Challenger;
use crate::error::{EncodeError, VerifyError};
use crate::settlement::SettlementStatus;
use crate::signer::TokenSigner;
use crate::token::{check_caveats, Identifier, Token};
use crate::types::{PaymentHash, Preimage, TokenId};
use crate::unix_now;

pub struct Minter {
    signer: Arc<dyn TokenSigner>,
    challenger: Arc<Challenger>,
}

impl Minter {
    pub fn new(signer: Arc<dyn TokenSigner>, challenger: Arc<Challenger>) -> Self {
        Self { signer, challenger }
    }

    pub fn challenger(&self) -> &Arc<Challenger> {
        &self.challenger
    }

    /// Whether `token` carries a valid signature. No other check is made.
    pub fn signature_valid(&self, token: &Token) -> bool {
        self.signer.verify(token)
    }

    /// Mint a fresh token bound to `payment_hash`.
    pub fn mint(&self, payment_hash: PaymentHash, caveats: Vec<Caveat>) -> Result<Token, EncodeError> {
        check_caveats(&caveats)?;
        let identifier = Identifier::new(payment_hash, TokenId::random());
        let signature = self.signer.sign(&identifier, &caveats);
        Ok(Token::new(identifier, caveats, signature))
    }

    /// Verify a presented token and preimage for a request to `path` on
    /// `service`. On success the use is counted and the token's caveats are
    /// returned.
    pub async fn verify(
        &self,
        token: &Token,
        preimage: &Preimage,
        path: &str,
        service: &str,
    ) -> Result<Vec<Caveat>, VerifyError> {
        self.verify_at(token, preimage, path, service, unix_now()).await
    }

    /// [`Minter::verify`] against an explicit clock.
    ///
    /// Order: signature, preimage, settlement, then caveats in token order.
    pub async fn verify_at(
        &self,
        token: &Token,
        preimage: &Preimage,
        path: &str,
        service: &str,
        now: u64,
    ) -> Result<Vec<Caveat>, VerifyError> {
        if !self.signer.verify(token) {
            return Err(VerifyError::InvalidSignature);
        }

        let hash = token.payment_hash();
        if !preimage.matches(&hash) {
            return Err(VerifyError::SecretMismatch);
        }

        match self.challenger.check_settlement(&hash).await? {
            SettlementStatus::Settled(_) => {}
            SettlementStatus::Pending | SettlementStatus::Expired => {
                return Err(VerifyError::NotSettled)
            }
            SettlementStatus::Unknown => return Err(VerifyError::UnknownPaymentHash),
        }

        let store = self.challenger.store();
        let ctx = RequestContext {
            path,
            service,
            now,
            uses: store.uses(&hash),
        };
        if let Some(violated) = token.caveats().iter().find(|c| !c.evaluate(&ctx)) {
            return Err(VerifyError::CaveatViolation(violated.clone()));
        }

        let limit = token
            .caveats()
            .iter()
            .filter_map(|c| match c {
                Caveat::Capacity(n) => Some(*n),
                _ => None,
            })
            .min();
        // A concurrent request may have taken the last use since the caveat check.
        if !store.record_use(&hash, limit) {
            return Err(VerifyError::CaveatViolation(Caveat::Capacity(limit.unwrap_or(0))));
        }

        Ok(token.caveats().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenger::ChallengerConfig;
    use crate::memory::MemoryInvoiceBackend;
    use crate::signer::RootKey;
    use proptest::prelude::*;

    struct Fixture {
        backend: Arc<MemoryInvoiceBackend>,
        minter: Minter,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryInvoiceBackend::new());
        let challenger = Arc::new(Challenger::new(backend.clone(), ChallengerConfig::default()));
        let key = Arc::new(RootKey::new(vec![42u8; 32]).unwrap());
        Fixture {
            backend,
            minter: Minter::new(key, challenger),
        }
    }

    async fn paid_token(f: &Fixture, caveats: Vec<Caveat>) -> (Token, Preimage) {
        let invoice = f.minter.challenger().request_challenge(100).await.unwrap();
        let token = f.minter.mint(invoice.payment_hash, caveats).unwrap();
        let preimage = f.backend.settle(&invoice.payment_hash).unwrap();
        (token, preimage)
    }

    #[tokio::test]
    async fn settled_token_verifies() {
        let f = fixture();
        let caveats = vec![Caveat::PathPrefix("/api".into())];
        let (token, preimage) = paid_token(&f, caveats.clone()).await;
        let resolved = f.minter.verify(&token, &preimage, "/api/x", "api").await.unwrap();
        assert_eq!(resolved, caveats);
    }

    #[tokio::test]
    async fn pending_token_is_not_settled_until_paid() {
        let f = fixture();
        let invoice = f.minter.challenger().request_challenge(100).await.unwrap();
        let token = f.minter.mint(invoice.payment_hash, vec![]).unwrap();
        let preimage = f.backend.preimage(&invoice.payment_hash).unwrap();

        assert_eq!(
            f.minter.verify(&token, &preimage, "/", "svc").await,
            Err(VerifyError::NotSettled)
        );
        f.backend.settle(&invoice.payment_hash);
        assert!(f.minter.verify(&token, &preimage, "/", "svc").await.is_ok());
        // Monotonic: stays valid.
        assert!(f.minter.verify(&token, &preimage, "/", "svc").await.is_ok());
    }

    #[tokio::test]
    async fn wrong_preimage_is_secret_mismatch() {
        let f = fixture();
        let (token, _) = paid_token(&f, vec![]).await;
        assert_eq!(
            f.minter.verify(&token, &Preimage::random(), "/", "svc").await,
            Err(VerifyError::SecretMismatch)
        );
    }

    #[tokio::test]
    async fn signature_checked_before_backend() {
        let f = fixture();
        let (token, preimage) = paid_token(&f, vec![]).await;
        let other_key = RootKey::new(vec![7u8; 32]).unwrap();
        let forged = Token::new(
            *token.identifier(),
            vec![],
            other_key.sign(token.identifier(), &[]),
        );
        f.backend.set_unavailable(true);
        assert_eq!(
            f.minter.verify(&forged, &preimage, "/", "svc").await,
            Err(VerifyError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn stripping_a_caveat_breaks_signature() {
        let f = fixture();
        let (token, preimage) = paid_token(&f, vec![Caveat::Service("a".into())]).await;
        let stripped = Token::new(*token.identifier(), vec![], *token.signature());
        assert_eq!(
            f.minter.verify(&stripped, &preimage, "/", "b").await,
            Err(VerifyError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn unknown_payment_hash() {
        let f = fixture();
        let preimage = Preimage::random();
        let token = f.minter.mint(preimage.payment_hash(), vec![]).unwrap();
        assert_eq!(
            f.minter.verify(&token, &preimage, "/", "svc").await,
            Err(VerifyError::UnknownPaymentHash)
        );
    }

    #[tokio::test]
    async fn first_violated_caveat_is_reported() {
        let f = fixture();
        let caveats = vec![
            Caveat::Service("api".into()),
            Caveat::Expiry(500),
            Caveat::PathPrefix("/api".into()),
        ];
        let (token, preimage) = paid_token(&f, caveats).await;

        assert_eq!(
            f.minter.verify_at(&token, &preimage, "/other", "api", 600).await,
            Err(VerifyError::CaveatViolation(Caveat::Expiry(500)))
        );
        assert_eq!(
            f.minter.verify_at(&token, &preimage, "/other", "web", 600).await,
            Err(VerifyError::CaveatViolation(Caveat::Service("api".into())))
        );
        assert_eq!(
            f.minter.verify_at(&token, &preimage, "/other", "api", 100).await,
            Err(VerifyError::CaveatViolation(Caveat::PathPrefix("/api".into())))
        );
        assert!(f.minter.verify_at(&token, &preimage, "/api", "api", 100).await.is_ok());
    }

    #[tokio::test]
    async fn capacity_limits_uses() {
        let f = fixture();
        let (token, preimage) = paid_token(&f, vec![Caveat::Capacity(2)]).await;
        assert!(f.minter.verify(&token, &preimage, "/", "svc").await.is_ok());
        assert!(f.minter.verify(&token, &preimage, "/", "svc").await.is_ok());
        assert_eq!(
            f.minter.verify(&token, &preimage, "/", "svc").await,
            Err(VerifyError::CaveatViolation(Caveat::Capacity(2)))
        );
    }

    #[tokio::test]
    async fn rejected_requests_do_not_consume_capacity() {
        let f = fixture();
        let caveats = vec![Caveat::PathPrefix("/a".into()), Caveat::Capacity(1)];
        let (token, preimage) = paid_token(&f, caveats).await;
        assert!(f.minter.verify(&token, &preimage, "/b", "svc").await.is_err());
        assert!(f.minter.verify(&token, &preimage, "/a", "svc").await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_uses_respect_capacity() {
        let f = Arc::new(fixture());
        let (token, preimage) = paid_token(&f, vec![Caveat::Capacity(3)]).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let f = f.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                f.minter.verify(&token, &preimage, "/", "svc").await.is_ok()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[tokio::test]
    async fn backend_outage_while_pending_is_not_auth_failure() {
        let f = fixture();
        let invoice = f.minter.challenger().request_challenge(100).await.unwrap();
        let token = f.minter.mint(invoice.payment_hash, vec![]).unwrap();
        let preimage = f.backend.preimage(&invoice.payment_hash).unwrap();
        f.backend.set_unavailable(true);
        assert!(matches!(
            f.minter.verify(&token, &preimage, "/", "svc").await,
            Err(VerifyError::BackendUnavailable(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn any_bit_flip_is_invalid_signature(bit in 0usize..8, pos_seed in any::<usize>()) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let result = rt.block_on(async {
                let f = fixture();
                let caveats = vec![Caveat::PathPrefix("/api".into()), Caveat::Expiry(u64::MAX)];
                let (token, preimage) = paid_token(&f, caveats).await;

                let mut bytes = token.to_bytes();
                let pos = pos_seed % bytes.len();
                bytes[pos] ^= 1 << bit;

                match Token::from_bytes(&bytes) {
                    Ok(mutated) => f.minter.verify(&mutated, &preimage, "/api", "svc").await,
                    Err(_) => Err(VerifyError::InvalidSignature),
                }
            });
            prop_assert_eq!(result, Err(VerifyError::InvalidSignature));
        }
    }
}
