//! Authenticated encryption: AES-256-GCM.
//!
//! Key size: 32 bytes. Nonce: 12 bytes (random). Tag: 16 bytes.
//!
//! Blob layout (before base64): [ nonce (12) | tag (16) | ciphertext ]

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` with a 32-byte key, producing `nonce || tag || ct`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the tag to the ciphertext; the wire wants it up front.
    let ct_and_tag = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)?;
    let split = ct_and_tag.len() - TAG_LEN;

    let mut out = Vec::with_capacity(NONCE_LEN + ct_and_tag.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct_and_tag[split..]);
    out.extend_from_slice(&ct_and_tag[..split]);
    Ok(out)
}

/// Decrypt blob bytes in `nonce || tag || ct` layout.
pub fn open(key: &[u8; 32], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, rest) = blob.split_at(NONCE_LEN);
    let (tag, ct) = rest.split_at(TAG_LEN);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;

    let mut ct_and_tag = Vec::with_capacity(rest.len());
    ct_and_tag.extend_from_slice(ct);
    ct_and_tag.extend_from_slice(tag);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ct_and_tag.as_slice())
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}
