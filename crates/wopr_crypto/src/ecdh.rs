//! ECDH payload sealing.
//!
//! Two key-agreement modes feed the same AEAD:
//!
//! v2 (forward secret): each side mints a fresh X25519 keypair per
//! connection; the payload key is HKDF-SHA256 over the ephemeral-ephemeral
//! shared secret with info `wopr-p2p-v2`. Ephemeral secrets live for one
//! connection and are zeroized on drop.
//!
//! v1 (fallback): static-static ECDH over the peers' long-term encryption
//! keys, info `wopr-p2p-v1`. Used only when the remote cannot negotiate v2.
//!
//! Ciphertext is the `aead` blob (`nonce || tag || ct`), base64-encoded.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::{
    aead,
    error::CryptoError,
    identity::{decode_key_hex, EncryptKeyPair},
};

const INFO_V2: &[u8] = b"wopr-p2p-v2";
const INFO_V1: &[u8] = b"wopr-p2p-v1";

// ── Ephemeral keypair ─────────────────────────────────────────────────────────

/// One X25519 keypair per connection. Never persisted.
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKeyPair {
    #[zeroize(skip)]
    public_hex: String,
    secret_bytes: [u8; 32],
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self {
            public_hex: hex::encode(X25519Public::from(&secret).as_bytes()),
            secret_bytes: secret.to_bytes(),
        }
    }

    pub fn public_hex(&self) -> &str {
        &self.public_hex
    }
}

/// ECDH against `peer_pub_hex`, then HKDF-SHA256 down to a 32-byte AEAD key.
fn derive_key(
    secret_bytes: &[u8; 32],
    peer_pub_hex: &str,
    info: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let secret = StaticSecret::from(*secret_bytes);
    let peer = X25519Public::from(decode_key_hex(peer_pub_hex)?);
    let shared = secret.diffie_hellman(&peer);

    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(info, key.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

// ── v2: ephemeral-ephemeral ───────────────────────────────────────────────────

pub fn encrypt_with_ephemeral(
    plaintext: &[u8],
    my_ephemeral: &EphemeralKeyPair,
    peer_ephemeral_pub_hex: &str,
) -> Result<String, CryptoError> {
    let key = derive_key(&my_ephemeral.secret_bytes, peer_ephemeral_pub_hex, INFO_V2)?;
    Ok(B64.encode(aead::seal(&key, plaintext)?))
}

pub fn decrypt_with_ephemeral(
    blob_b64: &str,
    my_ephemeral: &EphemeralKeyPair,
    peer_ephemeral_pub_hex: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = derive_key(&my_ephemeral.secret_bytes, peer_ephemeral_pub_hex, INFO_V2)?;
    aead::open(&key, &B64.decode(blob_b64)?)
}

// ── v1: static-static fallback ────────────────────────────────────────────────

pub fn encrypt_static(
    plaintext: &[u8],
    my_encrypt: &EncryptKeyPair,
    peer_encrypt_pub_hex: &str,
) -> Result<String, CryptoError> {
    let key = derive_key(
        &my_encrypt.static_secret().to_bytes(),
        peer_encrypt_pub_hex,
        INFO_V1,
    )?;
    Ok(B64.encode(aead::seal(&key, plaintext)?))
}

pub fn decrypt_static(
    blob_b64: &str,
    my_encrypt: &EncryptKeyPair,
    peer_encrypt_pub_hex: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = derive_key(
        &my_encrypt.static_secret().to_bytes(),
        peer_encrypt_pub_hex,
        INFO_V1,
    )?;
    aead::open(&key, &B64.decode(blob_b64)?)
}
