//! Key-rotation records.
//!
//! A rotation is authorised by the key being retired: the record carries the
//! new signing + encryption public keys and is signed by the OLD signing key.
//! Peers that accept it keep the old key authorised for a grace window so
//! in-flight traffic and slow-to-update peers are not cut off.

use serde::{Deserialize, Serialize};

use wopr_crypto::identity::{verify, SigningKeyPair};

use crate::{canonical, error::ProtoError, now_ms};

/// Default grace period: 7 days.
pub const DEFAULT_GRACE_PERIOD_MS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRotation {
    pub old_sign_pub: String,
    pub new_sign_pub: String,
    pub new_encrypt_pub: String,
    pub reason: String,
    pub effective_at: i64,
    pub grace_period_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl KeyRotation {
    /// Mint a rotation record effective now, signed by the retiring key.
    pub fn create(
        old: &SigningKeyPair,
        new_sign_pub: &str,
        new_encrypt_pub: &str,
        reason: &str,
        grace_period_ms: i64,
    ) -> Result<Self, ProtoError> {
        let mut rotation = KeyRotation {
            old_sign_pub: old.public_hex().to_string(),
            new_sign_pub: new_sign_pub.to_string(),
            new_encrypt_pub: new_encrypt_pub.to_string(),
            reason: reason.to_string(),
            effective_at: now_ms(),
            grace_period_ms,
            sig: None,
        };
        rotation.sig = Some(old.sign(&canonical::signing_bytes(&rotation)?));
        Ok(rotation)
    }

    /// Verify `sig` under `old_sign_pub`.
    pub fn verify(&self) -> Result<(), ProtoError> {
        let sig = self.sig.as_ref().ok_or(ProtoError::MissingSignature)?;
        let bytes = canonical::signing_bytes(self)?;
        verify(&self.old_sign_pub, &bytes, sig)?;
        Ok(())
    }

    /// The instant the old key stops authorising.
    pub fn valid_until(&self) -> i64 {
        self.effective_at + self.grace_period_ms
    }
}
