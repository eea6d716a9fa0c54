// ============================================================================
// Protocol constants
// ============================================================================

// --- Crypto -----------------------------------------------------------------

/// AES-256 key length in bytes. Every element record carries one key.
pub const KEY_LEN: usize = 32;

// --- Transport --------------------------------------------------------------

/// Read timeout and overall deadline for outbound calls to an anonymizer,
/// in seconds. Config and upgrade blobs can be large and chains slow.
pub const FORWARD_TIMEOUT_SECS: u64 = 300;

/// Maximum accepted envelope size in bytes (base64 text, before decryption).
/// Upgrade blobs dominate; anything larger is a broken or hostile peer.
pub const MAX_ENVELOPE_SIZE: usize = 33_554_432; // 32 MB

// --- Evidence transfer ------------------------------------------------------

/// Seconds between evidence transfer supervisor ticks.
pub const TRANSFER_TICK_SECS: u64 = 1;

// --- Result statuses --------------------------------------------------------

/// Wire value for a successful command result.
pub const STATUS_OK: &str = "OK";

/// Wire value for a failed command result.
pub const STATUS_ERROR: &str = "ERROR";
