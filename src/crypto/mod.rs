//! Key material derivation.

pub mod kdf;

pub use kdf::{tid, KeySchedule};
