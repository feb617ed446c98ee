/// Default TCP port the relay listens on.
pub const DEFAULT_PORT: u16 = 5000;

/// Reply sent for a malformed or unresolvable initial request.
pub const ERROR_BAD_REQUEST: &str = "ERROR 400";

/// Reply sent to a connection rejected by the accept-time rate limiter.
pub const ERROR_RATE_LIMITED: &str = "ERROR 429";

/// Prefix shared by every error reply.
pub const ERROR_PREFIX: &str = "ERROR ";

/// Number of characters in a generated party code.
pub const PARTY_CODE_LEN: usize = 6;

/// Characters a generated party code is drawn from.
pub const PARTY_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
