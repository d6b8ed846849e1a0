//! Core types: constants, errors, and the external-collaborator traits.

pub mod constants;
pub mod error;
pub mod traits;

pub use constants::*;
pub use error::{FrameError, StoreError, StreamError};
pub use traits::{EpochClock, EpochInfo, MessageStore, StoreKey, SystemEpochClock};
