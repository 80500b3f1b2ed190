//! Session key derivation and the sealed record codec.
//!
//! One symmetric key per login, derived deterministically from wallet
//! entropy (a signature or auth token) and the owner address.  The key
//! never leaves this module in plaintext; everything written to the local
//! store goes through [`encrypt_record`] / [`decrypt_record`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{
    KDF_CONTEXT_SESSION_KEY, NONCE_SIZE, SEALED_RECORD_DELIMITER, SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;
use crate::types::OwnerAddress;

/// A non-exportable symmetric session key.
///
/// The raw bytes are private to this module and zeroized on drop.  The only
/// operations a key supports are [`encrypt_record`] and [`decrypt_record`];
/// re-deriving the same key after a reconnect goes through
/// [`derive_session_key`] with the same inputs.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SYMMETRIC_KEY_SIZE]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Derive the session key for an owner from wallet-provided entropy.
///
/// BLAKE3 `derive_key` with a fixed, versioned application context; the
/// entropy is the input key material and the owner address acts as a salt,
/// so two owners with identical entropy still get distinct keys.
/// Deterministic: the same (entropy, owner) pair always yields the same key.
pub fn derive_session_key(
    entropy: &str,
    owner: &OwnerAddress,
) -> Result<SessionKey, CryptoError> {
    if entropy.is_empty() {
        return Err(CryptoError::InvalidInput("entropy must not be empty"));
    }
    if owner.is_empty() {
        return Err(CryptoError::InvalidInput("owner address must not be empty"));
    }

    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SESSION_KEY);
    hasher.update(entropy.as_bytes());
    hasher.update(owner.as_str().as_bytes());
    let hash = hasher.finalize();

    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&hash.as_bytes()[..SYMMETRIC_KEY_SIZE]);
    Ok(SessionKey(key))
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a JSON-serializable record into an opaque string:
/// `base64(nonce) ":" base64(ciphertext)`, fresh random nonce per call.
pub fn encrypt_record<T: Serialize>(key: &SessionKey, record: &T) -> Result<String, CryptoError> {
    let plaintext = serde_json::to_vec(record)?;

    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(format!(
        "{}{}{}",
        BASE64.encode(nonce_bytes),
        SEALED_RECORD_DELIMITER,
        BASE64.encode(ciphertext)
    ))
}

/// Decrypt an opaque string produced by [`encrypt_record`].
///
/// Structural problems (missing delimiter, bad base64, truncated nonce)
/// report [`CryptoError::MalformedCiphertext`]; a failed authentication tag
/// reports [`CryptoError::AuthenticationFailed`] so callers can distinguish
/// a corrupt record from a wrong session key.
pub fn decrypt_record<T: DeserializeOwned>(
    key: &SessionKey,
    sealed: &str,
) -> Result<T, CryptoError> {
    let (nonce_part, ciphertext_part) = sealed
        .split_once(SEALED_RECORD_DELIMITER)
        .ok_or(CryptoError::MalformedCiphertext("missing delimiter"))?;

    let nonce_bytes = BASE64
        .decode(nonce_part)
        .map_err(|_| CryptoError::MalformedCiphertext("nonce is not valid base64"))?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::MalformedCiphertext("wrong nonce length"));
    }

    let ciphertext = BASE64
        .decode(ciphertext_part)
        .map_err(|_| CryptoError::MalformedCiphertext("ciphertext is not valid base64"))?;

    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let nonce = XNonce::from_slice(&nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(serde_json::from_slice(&plaintext)?)
}
