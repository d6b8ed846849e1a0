//! Frame record, codec, and AEAD envelope.
//!
//! A frame is serialized as a CBOR map with integer keys
//! (`{0: kind, 1: ack, 2: payload}`), zero-padded to the fixed frame size,
//! and sealed with XChaCha20-Poly1305 under a per-frame key and a freshly
//! sampled 24-byte nonce. Every sealed frame is exactly the substrate's
//! payload size, so the store sees nothing but uniform ciphertexts:
//!
//! ```text
//! nonce (24) || seal(key_n, nonce, pad(cbor(frame), frame_size))
//! ```

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use ciborium::value::{Integer, Value};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::core::constants::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::core::error::FrameError;

// CBOR map keys.
const KEY_KIND: u8 = 0;
const KEY_ACK: u8 = 1;
const KEY_PAYLOAD: u8 = 2;

/// Position of a frame within its direction of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// The first frame of a direction.
    Start = 0,
    /// A data-carrying frame.
    Data = 1,
    /// The final frame of a direction; published at most once.
    End = 2,
}

impl FrameKind {
    /// Decode the wire tag.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FrameKind::Start),
            1 => Some(FrameKind::Data),
            2 => Some(FrameKind::End),
            _ => None,
        }
    }
}

/// One frame of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame's own index. Local bookkeeping only, never serialized:
    /// the index is implied by the storage identifier the frame sits under.
    pub id: u64,
    /// Position tag.
    pub kind: FrameKind,
    /// Highest consecutive inbound frame index seen when this frame was
    /// assembled (cumulative acknowledgement).
    pub ack: u64,
    /// Transported bytes. May be empty for pure acks and terminal frames.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize to the integer-keyed CBOR map.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let record = Value::Map(vec![
            (
                Value::Integer(Integer::from(KEY_KIND)),
                Value::Integer(Integer::from(self.kind as u8)),
            ),
            (
                Value::Integer(Integer::from(KEY_ACK)),
                Value::Integer(Integer::from(self.ack)),
            ),
            (
                Value::Integer(Integer::from(KEY_PAYLOAD)),
                Value::Bytes(self.payload.clone()),
            ),
        ]);
        let mut buf = Vec::with_capacity(self.payload.len() + 32);
        ciborium::ser::into_writer(&record, &mut buf)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from a (possibly zero-padded) plaintext.
    ///
    /// `id` is the index the frame was fetched under; it is attached to the
    /// record, not read from it. Trailing padding after the CBOR item is
    /// ignored.
    pub fn decode(plaintext: &[u8], id: u64) -> Result<Self, FrameError> {
        let record: Value = ciborium::de::from_reader(plaintext)
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        let Value::Map(entries) = record else {
            return Err(FrameError::Decode("frame record is not a map".into()));
        };

        let mut kind = None;
        let mut ack = None;
        let mut payload = None;
        for (key, value) in entries {
            let Value::Integer(key) = key else {
                return Err(FrameError::Decode("non-integer record key".into()));
            };
            match u8::try_from(i128::from(key)) {
                Ok(KEY_KIND) => {
                    let Value::Integer(v) = value else {
                        return Err(FrameError::Decode("kind is not an integer".into()));
                    };
                    let tag = u8::try_from(i128::from(v))
                        .map_err(|_| FrameError::Decode("kind out of range".into()))?;
                    kind = Some(
                        FrameKind::from_u8(tag)
                            .ok_or_else(|| FrameError::Decode(format!("unknown kind {tag}")))?,
                    );
                }
                Ok(KEY_ACK) => {
                    let Value::Integer(v) = value else {
                        return Err(FrameError::Decode("ack is not an integer".into()));
                    };
                    ack = Some(
                        u64::try_from(i128::from(v))
                            .map_err(|_| FrameError::Decode("ack out of range".into()))?,
                    );
                }
                Ok(KEY_PAYLOAD) => {
                    let Value::Bytes(b) = value else {
                        return Err(FrameError::Decode("payload is not a byte string".into()));
                    };
                    payload = Some(b);
                }
                _ => {}
            }
        }

        Ok(Frame {
            id,
            kind: kind.ok_or_else(|| FrameError::Decode("missing kind".into()))?,
            ack: ack.ok_or_else(|| FrameError::Decode("missing ack".into()))?,
            payload: payload.ok_or_else(|| FrameError::Decode("missing payload".into()))?,
        })
    }
}

/// Fixed sizes of the frame envelope, computed once per stream.
///
/// The padded plaintext (`frame_size`) is whatever the substrate payload
/// leaves after the nonce and the authentication tag; the payload capacity
/// subtracts the codec's worst-case overhead, measured by encoding a
/// maximal frame rather than assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Fixed length of every sealed frame: the substrate's value size.
    pub substrate_payload: usize,
    /// Fixed plaintext length every encoded frame is padded to.
    pub frame_size: usize,
    /// Maximum payload bytes a single frame can carry.
    pub max_payload: usize,
}

impl FrameGeometry {
    /// Derive the geometry for a substrate with the given fixed value size.
    pub fn for_substrate(substrate_payload: usize) -> Result<Self, FrameError> {
        let frame_size = substrate_payload
            .checked_sub(NONCE_SIZE + TAG_SIZE)
            .ok_or(FrameError::SubstrateTooSmall(substrate_payload))?;

        // Worst-case codec overhead: maximal ack, longest payload header.
        let probe = Frame {
            id: 0,
            kind: FrameKind::End,
            ack: u64::MAX,
            payload: vec![0; substrate_payload],
        };
        let overhead = probe.encode()?.len() - substrate_payload;

        let max_payload = frame_size
            .checked_sub(overhead)
            .filter(|m| *m > 0)
            .ok_or(FrameError::SubstrateTooSmall(substrate_payload))?;

        Ok(Self {
            substrate_payload,
            frame_size,
            max_payload,
        })
    }
}

/// Encode, pad, and seal `frame` under `key` with a fresh random nonce.
///
/// The result is exactly `geometry.substrate_payload` bytes.
pub fn seal(frame: &Frame, key: &[u8; KEY_SIZE], geometry: &FrameGeometry) -> Result<Vec<u8>, FrameError> {
    if frame.payload.len() > geometry.max_payload {
        return Err(FrameError::Oversize {
            len: frame.payload.len(),
            max: geometry.max_payload,
        });
    }

    let mut plaintext = frame.encode()?;
    if plaintext.len() > geometry.frame_size {
        return Err(FrameError::Encode(format!(
            "encoded record of {} bytes exceeds frame size {}",
            plaintext.len(),
            geometry.frame_size
        )));
    }
    plaintext.resize(geometry.frame_size, 0);

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new(key.into());
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| FrameError::Seal)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    debug_assert_eq!(out.len(), geometry.substrate_payload);
    Ok(out)
}

/// Split the nonce, open the envelope, and decode the frame stored at
/// index `id`.
pub fn open(ciphertext: &[u8], key: &[u8; KEY_SIZE], id: u64) -> Result<Frame, FrameError> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(FrameError::Open);
    }
    let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(key.into());
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| FrameError::Open)?;

    Frame::decode(&plaintext, id)
}
