//! wopr_crypto — WOPR P2P cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Key material crosses module boundaries as hex strings (64 chars for a
//!   32-byte public key), ciphertext as base64 blobs.
//!
//! # Module layout
//! - `identity` — long-term Ed25519 signing + X25519 encryption keypairs
//! - `ecdh`     — per-connection ephemeral keys, ECDH → HKDF → AEAD sealing
//! - `aead`     — AES-256-GCM helpers (12-byte nonce, 16-byte tag)
//! - `hash`     — short-id and rendezvous-topic derivation (SHA-256)
//! - `error`    — unified error type

pub mod aead;
pub mod ecdh;
pub mod error;
pub mod hash;
pub mod identity;

pub use error::CryptoError;
