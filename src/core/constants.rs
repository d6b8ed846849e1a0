//! Protocol constants.
//!
//! Both peers must share these values; changing any of them breaks wire
//! compatibility with existing streams.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Frame encryption key size (XChaCha20).
pub const KEY_SIZE: usize = 32;

/// XChaCha20 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Storage identifier size (SHA-256 output).
pub const STORE_KEY_SIZE: usize = 32;

/// HKDF salt for the frame key and identifier-base material.
pub const KEYMATERIAL_SALT: &[u8] = b"stream_reader_writer_keymaterial";

/// HKDF salt for the local/remote address material.
pub const ADDR_SALT: &[u8] = b"stream_addr_material";

/// Default domain-separation prefix mixed into every storage address.
///
/// Peers must agree on this value out of band (it may be replaced per
/// stream via [`StreamConfig::tid_prefix`](crate::stream::StreamConfig)),
/// e.g. with a shared random value from the same handshake that produced
/// the stream secrets.
pub const DEFAULT_TID_PREFIX: &[u8] = b"dropline_storage_address_v1";

// =============================================================================
// STREAM PARAMETERS
// =============================================================================

/// Default sliding-window width: frames in flight without an acknowledgement.
pub const DEFAULT_WINDOW: u64 = 3;

/// Default soft cap on the outbound buffer, in frame payloads.
pub const DEFAULT_WRITE_BUF_FRAMES: usize = 42;

/// Default timeout before a blocking `read` or `write` gives up when no
/// deadline is set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default pause between substrate fetch attempts for a frame that has not
/// arrived yet.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// =============================================================================
// EPOCH CLOCK
// =============================================================================

/// Default epoch period for [`SystemEpochClock`](crate::SystemEpochClock).
///
/// Retransmission deadlines are `remaining_in_epoch + 2 * period`, so this
/// should approximate the substrate's effective durability horizon.
pub const DEFAULT_EPOCH_PERIOD: Duration = Duration::from_secs(20 * 60);

/// Network-family tag carried by stream addresses.
pub const NETWORK_TAG: &str = "dropline";
