use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::constants::HASH_LEN;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 of `message` under `key`.
pub fn compute_mac(key: &[u8], message: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Constant-time equality of two MACs.
pub fn verify_mac(expected: &[u8; HASH_LEN], presented: &[u8; HASH_LEN]) -> bool {
    expected.ct_eq(presented).into()
}

/// Constant-time byte comparison that does not leak input lengths.
///
/// Both inputs are hashed to fixed-length digests before comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}
