use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// Empty entropy or owner address handed to key derivation.
    #[error("Invalid key derivation input: {0}")]
    InvalidInput(&'static str),

    #[error("Encryption failed")]
    EncryptionFailed,

    /// The sealed record is structurally broken (missing delimiter,
    /// bad encoding, truncated nonce).  Distinct from a tag failure so
    /// callers can tell "corrupt record" from "wrong session key".
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(&'static str),

    /// Authentication tag check failed: wrong key or tampered data.
    #[error("Decryption failed: authentication tag mismatch")]
    AuthenticationFailed,

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
