use thiserror::Error;

use crate::caveat::Caveat;

/// Failure to decode a token, hash or preimage from its wire form.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("token truncated")]
    Truncated,

    #[error("{0} trailing bytes after token")]
    TrailingBytes(usize),

    #[error("unsupported token version: {0}")]
    UnsupportedVersion(u16),

    #[error("invalid caveat: {0}")]
    InvalidCaveat(String),
}

/// A caveat list that does not fit the token's u16 length fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("too many caveats: {0}")]
    TooManyCaveats(usize),

    #[error("caveat {key} is {len} bytes, limit is {max}", max = u16::MAX)]
    CaveatTooLong { key: &'static str, len: usize },
}

/// Errors talking to the payment backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("settlement stream closed")]
    StreamClosed,
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Request(e.to_string())
    }
}

/// Errors raised while issuing a challenge or looking up its settlement.
#[derive(Debug, Clone, Error)]
pub enum ChallengeError {
    #[error("payment backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(u64),
}

/// Why a presented `(token, preimage)` pair was not admitted.
///
/// Every variant except [`VerifyError::BackendUnavailable`] and
/// [`VerifyError::NotSettled`] is reported to clients as a generic rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("preimage does not match payment hash")]
    SecretMismatch,

    #[error("unknown payment hash")]
    UnknownPaymentHash,

    #[error("payment not settled")]
    NotSettled,

    #[error("caveat not satisfied: {0}")]
    CaveatViolation(Caveat),

    #[error("payment backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl VerifyError {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::InvalidSignature => "invalid_signature",
            VerifyError::SecretMismatch => "secret_mismatch",
            VerifyError::UnknownPaymentHash => "unknown_payment_hash",
            VerifyError::NotSettled => "not_settled",
            VerifyError::CaveatViolation(_) => "caveat_violation",
            VerifyError::BackendUnavailable(_) => "backend_unavailable",
        }
    }
}

impl From<ChallengeError> for VerifyError {
    fn from(e: ChallengeError) -> Self {
        match e {
            ChallengeError::BackendUnavailable(msg) => VerifyError::BackendUnavailable(msg),
            ChallengeError::InvalidAmount(amount) => {
                VerifyError::BackendUnavailable(format!("invalid amount {amount}"))
            }
        }
    }
}

/// Invalid token root key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("root key too short: {0} bytes, minimum {min}", min = crate::constants::MIN_ROOT_KEY_LEN)]
    TooShort(usize),

    #[error("root key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}
