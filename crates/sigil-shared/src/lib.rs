//! # sigil-shared
//!
//! Core types and cryptography for the Sigil conversation vault.
//!
//! Everything a Sigil client persists is encrypted with a symmetric session
//! key derived from wallet-provided entropy.  This crate owns that key
//! derivation, the authenticated record codec, and the domain records the
//! other crates pass around.

pub mod constants;
pub mod crypto;
pub mod types;

mod error;

pub use crypto::SessionKey;
pub use error::CryptoError;
pub use types::*;
