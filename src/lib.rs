//! # dropline
//!
//! Reliable, authenticated, byte-oriented streams carried over an untrusted
//! key-addressable message store.
//!
//! Two peers that have agreed on a pair of shared secrets out of band can
//! open a bidirectional [`Stream`]. Each direction is a sequence of
//! independently encrypted, fixed-size frames published to a substrate whose
//! only operations are `put(key, ciphertext)` and `get(key)`. The substrate
//! provides nothing else: no ordering, no delivery guarantees, no metadata
//! privacy. Reliability, ordering, flow control, and secrecy all live in the
//! stream layer:
//!
//! - **Frame sealing**: every frame is zero-padded to a fixed size and
//!   sealed with XChaCha20-Poly1305 under a per-frame key, so an observer of
//!   the store sees only uniformly sized, unlinkable ciphertexts.
//! - **Key schedule**: per-frame keys and storage identifiers are derived
//!   from the handshake secrets with HKDF-SHA256 and a SHA-256 counter
//!   chain; both peers independently compute where to publish and fetch.
//! - **Sliding window**: a writer keeps at most `window` frames in flight
//!   and retransmits unacknowledged frames on an epoch-scaled timer.
//! - **Half-close handshake**: each direction closes with a terminal `End`
//!   frame that survives reordering and loss.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dropline::{MemStore, Stream, SystemEpochClock};
//!
//! # async fn demo() -> Result<(), dropline::StreamError> {
//! let store = Arc::new(MemStore::new(1000));
//! let clock = Arc::new(SystemEpochClock::default());
//!
//! // Secrets come from an out-of-band handshake; each peer passes its own
//! // secret first.
//! let alice = Stream::new(store.clone(), clock.clone(), b"alice-secret", b"bob-secret")?;
//! let bob = Stream::new(store, clock, b"bob-secret", b"alice-secret")?;
//!
//! alice.write(b"HELLO").await?;
//! alice.close().await?;
//!
//! let mut buf = [0u8; 16];
//! let n = bob.read(&mut buf).await?;
//! assert_eq!(&buf[..n], b"HELLO");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod crypto;
pub mod frame;
pub mod store;
pub mod stream;
pub mod timer;

pub use crate::core::error::{FrameError, StoreError, StreamError};
pub use crate::core::traits::{EpochClock, EpochInfo, MessageStore, StoreKey, SystemEpochClock};
pub use crate::frame::{Frame, FrameGeometry, FrameKind};
pub use crate::store::MemStore;
pub use crate::stream::{HalfState, Mode, Stream, StreamAddr, StreamConfig, StreamStats};
pub use crate::timer::{TimerQueue, TimerTarget};
