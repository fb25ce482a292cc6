/// Authentication scheme word used in `WWW-Authenticate` and `Authorization`.
pub const AUTH_SCHEME: &str = "L402";

/// Legacy scheme word accepted in `Authorization` headers.
pub const LEGACY_AUTH_SCHEME: &str = "LSAT";

/// Header carrying the payment challenge on 402 responses.
pub const CHALLENGE_HEADER: &str = "WWW-Authenticate";

/// Header carrying `token:preimage` on authenticated requests.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Metadata headers attached to requests forwarded after admission.
pub const TOKEN_ID_HEADER: &str = "X-Kirin-Token-Id";
pub const PAYMENT_HASH_HEADER: &str = "X-Kirin-Payment-Hash";
pub const CAVEATS_HEADER: &str = "X-Kirin-Caveats";

/// Wire version of the token identifier.
pub const TOKEN_VERSION: u16 = 0;

/// Length of payment hashes, preimages, token ids and signatures.
pub const HASH_LEN: usize = 32;

/// Minimum accepted length of the token root key.
pub const MIN_ROOT_KEY_LEN: usize = 32;

/// Default memo placed on issued invoices.
pub const DEFAULT_INVOICE_MEMO: &str = "L402";

/// Default lifetime of an unpaid challenge.
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 3600;

/// Default bound on a single payment backend call.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 10;

/// How long settled and expired entries are kept after reaching a final state.
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 3600;
