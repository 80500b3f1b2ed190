/// Application name
pub const APP_NAME: &str = "Sigil";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Delimiter between the encoded nonce and ciphertext halves of a sealed record
pub const SEALED_RECORD_DELIMITER: char = ':';

/// Maximum number of cached message lists retained per owner
pub const MESSAGE_CACHE_LIMIT: usize = 5;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SESSION_KEY: &str = "sigil-session-key-v1";
