//! Fixed-length byte values exchanged by the protocol.
//!
//! All three types are 32 bytes and travel as lowercase hex outside of the
//! token's binary encoding.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::constants::HASH_LEN;
use crate::error::DecodeError;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; HASH_LEN]);

        impl $name {
            pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
                let array: [u8; HASH_LEN] =
                    bytes.try_into().map_err(|_| DecodeError::InvalidLength {
                        expected: HASH_LEN,
                        actual: bytes.len(),
                    })?;
                Ok(Self(array))
            }

            pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s.trim())?;
                Self::from_slice(&bytes)
            }
        }

        impl From<[u8; HASH_LEN]> for $name {
            fn from(bytes: [u8; HASH_LEN]) -> Self {
                Self(bytes)
            }
        }
    };
}

fixed_bytes!(
    /// SHA-256 of a preimage; identifies an invoice and the token bound to it.
    PaymentHash
);

fixed_bytes!(
    /// Random per-token identifier, also the input for the per-token signing key.
    TokenId
);

fixed_bytes!(
    /// Payment secret revealed by settlement. Possession is proof of payment.
    Preimage
);

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", self.to_hex())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self.to_hex())
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Preimage([REDACTED])")
    }
}

impl TokenId {
    /// Fresh identifier from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; HASH_LEN];
        rand::fill(&mut bytes);
        Self(bytes)
    }
}

impl Preimage {
    /// Fresh preimage from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; HASH_LEN];
        rand::fill(&mut bytes);
        Self(bytes)
    }

    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(Sha256::digest(self.0).into())
    }

    /// Constant-time check that this preimage hashes to `hash`.
    pub fn matches(&self, hash: &PaymentHash) -> bool {
        self.payment_hash().0.ct_eq(&hash.0).into()
    }
}
