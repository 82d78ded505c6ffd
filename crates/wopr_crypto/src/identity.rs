//! Long-term identity key material.
//!
//! Each node owns exactly one `SigningKeyPair` (Ed25519, signs frames and
//! tokens) and one `EncryptKeyPair` (X25519 static, v1 fallback payload
//! encryption). Public halves travel as 64-char hex strings; signatures as
//! 128-char hex. Secret bytes are cleared on drop.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub(crate) fn decode_key_hex(s: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(s)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32-byte key, got {} hex chars", s.len())))
}

// ── Ed25519 signing keypair ───────────────────────────────────────────────────

/// Long-term signing key. Drop clears the secret via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct SigningKeyPair {
    #[zeroize(skip)]
    public_hex: String,
    secret_bytes: [u8; 32],
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public_hex: hex::encode(signing_key.verifying_key().to_bytes()),
            secret_bytes: signing_key.to_bytes(),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let secret_bytes = decode_key_hex(secret_hex)?;
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        Ok(Self {
            public_hex: hex::encode(signing_key.verifying_key().to_bytes()),
            secret_bytes,
        })
    }

    pub fn public_hex(&self) -> &str {
        &self.public_hex
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_bytes)
    }

    /// Sign arbitrary bytes; returns the 64-byte Ed25519 signature hex-encoded.
    pub fn sign(&self, msg: &[u8]) -> String {
        let sig = SigningKey::from_bytes(&self.secret_bytes).sign(msg);
        hex::encode(sig.to_bytes())
    }
}

/// Verify a hex signature made by the given hex-encoded Ed25519 public key.
pub fn verify(public_hex: &str, msg: &[u8], sig_hex: &str) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(&decode_key_hex(public_hex)?)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sig_bytes: [u8; 64] = hex::decode(sig_hex)?
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("bad signature length".into()))?;
    let sig = Signature::from_bytes(&sig_bytes);
    vk.verify(msg, &sig)
        .map_err(|_| CryptoError::SignatureVerification)
}

// ── X25519 static encryption keypair ──────────────────────────────────────────

/// Long-term encryption key (v1 static ECDH fallback).
#[derive(ZeroizeOnDrop)]
pub struct EncryptKeyPair {
    #[zeroize(skip)]
    public_hex: String,
    secret_bytes: [u8; 32],
}

impl EncryptKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self {
            public_hex: hex::encode(X25519Public::from(&secret).as_bytes()),
            secret_bytes: secret.to_bytes(),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let secret_bytes = decode_key_hex(secret_hex)?;
        let secret = StaticSecret::from(secret_bytes);
        Ok(Self {
            public_hex: hex::encode(X25519Public::from(&secret).as_bytes()),
            secret_bytes,
        })
    }

    pub fn public_hex(&self) -> &str {
        &self.public_hex
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_bytes)
    }

    pub(crate) fn static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret_bytes)
    }
}
