//! Token signing capability.
//!
//! The signature is an HMAC chain in the macaroon style: a per-token key is
//! derived from the server root key and the token id, the identifier is
//! signed with it, and each caveat is folded in with the previous signature
//! as key. Appending or altering any caveat changes the final signature.

use std::fmt;

use crate::caveat::Caveat;
use crate::constants::{HASH_LEN, MIN_ROOT_KEY_LEN};
use crate::error::KeyError;
use crate::hmac::{compute_mac, verify_mac};
use crate::token::{Identifier, Token};

/// Signs and verifies tokens with a key never sent to clients.
///
/// Implementations are loaded once at startup and immutable afterwards.
pub trait TokenSigner: Send + Sync {
    fn sign(&self, identifier: &Identifier, caveats: &[Caveat]) -> [u8; HASH_LEN];

    /// Recompute the signature and compare in constant time.
    fn verify(&self, token: &Token) -> bool {
        let expected = self.sign(token.identifier(), token.caveats());
        verify_mac(&expected, token.signature())
    }
}

/// Server-held root secret.
pub struct RootKey {
    secret: Vec<u8>,
}

impl RootKey {
    pub fn new(secret: Vec<u8>) -> Result<Self, KeyError> {
        if secret.len() < MIN_ROOT_KEY_LEN {
            return Err(KeyError::TooShort(secret.len()));
        }
        Ok(Self { secret })
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        Self::new(hex::decode(s.trim())?)
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey([REDACTED])")
    }
}

impl TokenSigner for RootKey {
    fn sign(&self, identifier: &Identifier, caveats: &[Caveat]) -> [u8; HASH_LEN] {
        let token_key = compute_mac(&self.secret, identifier.token_id.as_bytes());
        let mut sig = compute_mac(&token_key, &identifier.to_bytes());
        for caveat in caveats {
            sig = compute_mac(&sig, caveat.to_string().as_bytes());
        }
        sig
    }
}
