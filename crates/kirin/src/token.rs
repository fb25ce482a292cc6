//! Capability token wire format.
//!
//! ```text
//! version:u16 | payment_hash:32 | token_id:32 | caveat_count:u16
//!   | { len:u16 | utf8 "key=value" }* | signature:32
//! ```
//!
//! All integers are big-endian. Headers carry the bytes as standard base64.

use base64::Engine;

use crate::caveat::Caveat;
use crate::constants::{HASH_LEN, TOKEN_VERSION};
use crate::error::{DecodeError, EncodeError};
use crate::types::{PaymentHash, TokenId};

/// The signed, immutable head of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub version: u16,
    pub payment_hash: PaymentHash,
    pub token_id: TokenId,
}

impl Identifier {
    pub const ENCODED_LEN: usize = 2 + HASH_LEN + HASH_LEN;

    pub fn new(payment_hash: PaymentHash, token_id: TokenId) -> Self {
        Self {
            version: TOKEN_VERSION,
            payment_hash,
            token_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..2].copy_from_slice(&self.version.to_be_bytes());
        out[2..2 + HASH_LEN].copy_from_slice(self.payment_hash.as_bytes());
        out[2 + HASH_LEN..].copy_from_slice(self.token_id.as_bytes());
        out
    }
}

/// Check that `caveats` fit the wire format's u16 count and length fields.
pub fn check_caveats(caveats: &[Caveat]) -> Result<(), EncodeError> {
    if u16::try_from(caveats.len()).is_err() {
        return Err(EncodeError::TooManyCaveats(caveats.len()));
    }
    for caveat in caveats {
        let len = caveat.to_string().len();
        if u16::try_from(len).is_err() {
            return Err(EncodeError::CaveatTooLong {
                key: caveat.key(),
                len,
            });
        }
    }
    Ok(())
}

fn length_prefix(len: usize) -> [u8; 2] {
    // Bounded by `check_caveats` at mint time and by the decoder otherwise.
    u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes()
}

/// A minted capability token.
///
/// Constructed only by the minter or by decoding; decoding does not check
/// the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    identifier: Identifier,
    caveats: Vec<Caveat>,
    signature: [u8; HASH_LEN],
}

impl Token {
    pub(crate) fn new(identifier: Identifier, caveats: Vec<Caveat>, signature: [u8; HASH_LEN]) -> Self {
        Self {
            identifier,
            caveats,
            signature,
        }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn payment_hash(&self) -> PaymentHash {
        self.identifier.payment_hash
    }

    pub fn token_id(&self) -> TokenId {
        self.identifier.token_id
    }

    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    pub fn signature(&self) -> &[u8; HASH_LEN] {
        &self.signature
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Identifier::ENCODED_LEN + 2 + HASH_LEN + 32 * self.caveats.len());
        out.extend_from_slice(&self.identifier.to_bytes());
        out.extend_from_slice(&length_prefix(self.caveats.len()));
        for caveat in &self.caveats {
            let text = caveat.to_string();
            out.extend_from_slice(&length_prefix(text.len()));
            out.extend_from_slice(text.as_bytes());
        }
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);

        let version = reader.u16()?;
        if version != TOKEN_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let payment_hash = PaymentHash::from_slice(reader.take(HASH_LEN)?)?;
        let token_id = TokenId::from_slice(reader.take(HASH_LEN)?)?;

        let count = reader.u16()?;
        let mut caveats = Vec::with_capacity(usize::from(count).min(64));
        for _ in 0..count {
            let len = reader.u16()?;
            let raw = reader.take(usize::from(len))?;
            let text = std::str::from_utf8(raw)
                .map_err(|_| DecodeError::InvalidCaveat("not utf-8".to_string()))?;
            caveats.push(text.parse()?);
        }

        let mut signature = [0u8; HASH_LEN];
        signature.copy_from_slice(reader.take(HASH_LEN)?);

        if reader.remaining() > 0 {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            identifier: Identifier {
                version,
                payment_hash,
                token_id,
            },
            caveats,
            signature,
        })
    }

    /// Standard base64 of [`Token::to_bytes`].
    pub fn encode(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_bytes())
    }

    pub fn decode(s: &str) -> Result<Self, DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(s.trim())?;
        Self::from_bytes(&bytes)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.bytes.len() < n {
            return Err(DecodeError::Truncated);
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }
}
