//! Error types.

use thiserror::Error;

/// Errors from the key-value substrate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No value is stored under the requested key.
    #[error("value not found")]
    NotFound,

    /// The operation failed but may succeed if retried.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// The operation failed permanently.
    #[error("permanent store failure: {0}")]
    Fatal(String),
}

/// Errors from the frame codec and AEAD envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame record could not be encoded.
    #[error("frame encode failed: {0}")]
    Encode(String),

    /// The plaintext did not decode to a valid frame record.
    #[error("frame decode failed: {0}")]
    Decode(String),

    /// AEAD sealing failed.
    #[error("frame encryption failed")]
    Seal,

    /// AEAD opening failed (invalid tag or corrupted ciphertext).
    #[error("frame decryption failed (invalid tag or corrupted)")]
    Open,

    /// A payload larger than the frame capacity was supplied.
    #[error("payload of {len} bytes exceeds frame capacity {max}")]
    Oversize {
        /// Supplied payload length.
        len: usize,
        /// Maximum payload bytes per frame.
        max: usize,
    },

    /// The substrate's fixed payload size cannot hold a frame envelope.
    #[error("substrate payload of {0} bytes is too small for a frame")]
    SubstrateTooSmall(usize),
}

/// Top-level stream errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The half required by the operation has been closed.
    ///
    /// This is end-of-stream, not an anomaly.
    #[error("stream closed")]
    Closed,

    /// An absolute deadline elapsed before the operation could complete.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An inbound frame failed to decrypt or decode.
    ///
    /// The frame sequence is authenticated and positional, so the stream
    /// cannot safely continue; it halts and every subsequent call returns
    /// this error.
    #[error("stream corrupted")]
    Corrupted,

    /// Frame codec failure on the transmit path.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Substrate failure surfaced to the caller.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid stream configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
