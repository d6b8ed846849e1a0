//! Key and identifier schedule.
//!
//! From the two handshake secrets each peer derives two independent
//! streams of key material with HKDF-SHA256: its own (write) side from its
//! own secret, the peer's (read) side from the peer's secret. Each side
//! yields a 32-byte frame-encryption key and a 32-byte identifier base.
//! The key and storage identifier for frame `n` are then
//! `SHA-256(base || be64(n))`, so successive frames share no observable
//! relation beyond their size, while both peers agree on every address.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::core::constants::{ADDR_SALT, KEYMATERIAL_SALT, KEY_SIZE, STORE_KEY_SIZE};
use crate::core::traits::StoreKey;

/// Length of the address material derived for each end.
pub const ADDR_MATERIAL_SIZE: usize = 32;

/// SHA-256 of `data`.
fn h(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// `SHA-256(base || be64(n))`: one link of the per-frame derivation chain.
fn chain(base: &[u8; 32], n: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(base);
    hasher.update(n.to_be_bytes());
    hasher.finalize().into()
}

/// The storage address for a frame identifier.
///
/// The substrate is keyed on `SHA-256(prefix || id)` rather than on the
/// identifier itself; `prefix` is a domain-separation constant both peers
/// already possess.
pub fn tid(prefix: &[u8], id: &StoreKey) -> StoreKey {
    let mut input = Vec::with_capacity(prefix.len() + STORE_KEY_SIZE);
    input.extend_from_slice(prefix);
    input.extend_from_slice(&id.0);
    StoreKey(h(&input))
}

/// All key material for one stream, derived once at construction.
///
/// Key bytes are zeroized on drop.
pub struct KeySchedule {
    write_key: [u8; KEY_SIZE],
    read_key: [u8; KEY_SIZE],
    write_id_base: [u8; STORE_KEY_SIZE],
    read_id_base: [u8; STORE_KEY_SIZE],
    laddr: [u8; ADDR_MATERIAL_SIZE],
    raddr: [u8; ADDR_MATERIAL_SIZE],
}

impl KeySchedule {
    /// Derive the schedule from the two handshake secrets.
    ///
    /// Each peer passes its own secret first; the peers' calls are mirror
    /// images, so A's write side equals B's read side and vice versa. The
    /// secrets should carry at least 32 bytes of entropy.
    pub fn derive(my_secret: &[u8], their_secret: &[u8]) -> Self {
        let mut writer_okm = [0u8; KEY_SIZE + STORE_KEY_SIZE];
        Hkdf::<Sha256>::new(Some(KEYMATERIAL_SALT), my_secret)
            .expand(&[], &mut writer_okm)
            .expect("64 bytes is a valid HKDF-SHA256 output length");

        let mut reader_okm = [0u8; KEY_SIZE + STORE_KEY_SIZE];
        Hkdf::<Sha256>::new(Some(KEYMATERIAL_SALT), their_secret)
            .expand(&[], &mut reader_okm)
            .expect("64 bytes is a valid HKDF-SHA256 output length");

        let mut schedule = Self {
            write_key: [0; KEY_SIZE],
            read_key: [0; KEY_SIZE],
            write_id_base: [0; STORE_KEY_SIZE],
            read_id_base: [0; STORE_KEY_SIZE],
            laddr: [0; ADDR_MATERIAL_SIZE],
            raddr: [0; ADDR_MATERIAL_SIZE],
        };
        schedule.write_key.copy_from_slice(&writer_okm[..KEY_SIZE]);
        schedule
            .write_id_base
            .copy_from_slice(&writer_okm[KEY_SIZE..]);
        schedule.read_key.copy_from_slice(&reader_okm[..KEY_SIZE]);
        schedule
            .read_id_base
            .copy_from_slice(&reader_okm[KEY_SIZE..]);

        Hkdf::<Sha256>::new(Some(ADDR_SALT), my_secret)
            .expand(&[], &mut schedule.laddr)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Hkdf::<Sha256>::new(Some(ADDR_SALT), their_secret)
            .expand(&[], &mut schedule.raddr)
            .expect("32 bytes is a valid HKDF-SHA256 output length");

        writer_okm.zeroize();
        reader_okm.zeroize();
        schedule
    }

    /// Encryption key for outbound frame `n`.
    pub fn tx_frame_key(&self, n: u64) -> [u8; KEY_SIZE] {
        chain(&self.write_key, n)
    }

    /// Decryption key for inbound frame `n`.
    pub fn rx_frame_key(&self, n: u64) -> [u8; KEY_SIZE] {
        chain(&self.read_key, n)
    }

    /// Storage identifier for outbound frame `n`.
    pub fn tx_frame_id(&self, n: u64) -> StoreKey {
        StoreKey(chain(&self.write_id_base, n))
    }

    /// Storage identifier for inbound frame `n`.
    pub fn rx_frame_id(&self, n: u64) -> StoreKey {
        StoreKey(chain(&self.read_id_base, n))
    }

    /// Address material for the local end.
    pub fn local_addr_material(&self) -> &[u8; ADDR_MATERIAL_SIZE] {
        &self.laddr
    }

    /// Address material for the remote end.
    pub fn remote_addr_material(&self) -> &[u8; ADDR_MATERIAL_SIZE] {
        &self.raddr
    }
}

impl Drop for KeySchedule {
    fn drop(&mut self) {
        self.write_key.zeroize();
        self.read_key.zeroize();
        self.write_id_base.zeroize();
        self.read_id_base.zeroize();
    }
}
