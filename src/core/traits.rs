//! External-collaborator contracts.
//!
//! The stream core is generic over two collaborators it does not implement:
//! the key-addressable message store the frames travel through, and the
//! epoch clock that paces retransmissions.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::constants::{DEFAULT_EPOCH_PERIOD, STORE_KEY_SIZE};
use super::error::StoreError;

/// A storage address: 32 bytes, derived by hashing, never interpreted.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreKey(pub [u8; STORE_KEY_SIZE]);

impl AsRef<[u8]> for StoreKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({})", BASE64.encode(self.0))
    }
}

/// The untrusted key-value substrate frames are published to.
///
/// The store may observe keys and ciphertexts, reorder or delay requests
/// arbitrarily, and lose values; the stream layer compensates with
/// retransmission. Every stored value has the same fixed length,
/// [`payload_size`](MessageStore::payload_size) bytes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fixed length of every stored value, in bytes.
    fn payload_size(&self) -> usize;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: StoreKey, value: Vec<u8>) -> Result<(), StoreError>;

    /// Fetch the value stored under `key`.
    async fn get(&self, key: StoreKey) -> Result<Vec<u8>, StoreError>;
}

/// A point in epoch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochInfo {
    /// Number of whole periods elapsed since the clock's genesis.
    pub epoch: u64,
    /// Time already spent inside the current epoch.
    pub elapsed: Duration,
    /// Time left until the next epoch begins.
    pub remaining: Duration,
}

/// Coarse wall-clock used only to size retransmission deadlines.
pub trait EpochClock: Send + Sync {
    /// The fixed epoch period.
    fn period(&self) -> Duration;

    /// The current epoch and the position within it.
    fn now(&self) -> EpochInfo;
}

/// An [`EpochClock`] that divides UNIX time into fixed periods.
#[derive(Debug, Clone)]
pub struct SystemEpochClock {
    period: Duration,
}

impl SystemEpochClock {
    /// Create a clock with the given epoch period.
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for SystemEpochClock {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCH_PERIOD)
    }
}

impl EpochClock for SystemEpochClock {
    fn period(&self) -> Duration {
        self.period
    }

    fn now(&self) -> EpochInfo {
        let since_genesis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let period_ms = self.period.as_millis().max(1) as u64;
        let now_ms = since_genesis.as_millis() as u64;
        let epoch = now_ms / period_ms;
        let elapsed = Duration::from_millis(now_ms % period_ms);
        EpochInfo {
            epoch,
            elapsed,
            remaining: self.period - elapsed,
        }
    }
}
