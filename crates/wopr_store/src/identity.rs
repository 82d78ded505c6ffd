//! Identity lifecycle: init, load, rotate.
//!
//! Exactly one identity per node, persisted in `identity.json` with
//! owner-only permissions. Rotation replaces the file atomically and emits a
//! `KeyRotation` record signed by the RETIRING key; the old private key is
//! not kept locally afterwards (peers keep the old public key in history).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use wopr_crypto::hash::short_id;
use wopr_crypto::identity::{EncryptKeyPair, SigningKeyPair};
use wopr_proto::rotation::{KeyRotation, DEFAULT_GRACE_PERIOD_MS};
use wopr_proto::token::InviteToken;
use wopr_proto::now_ms;

use crate::{error::StoreError, fs};

pub const IDENTITY_FILE: &str = "identity.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRecord {
    sign_pub: String,
    sign_priv: String,
    encrypt_pub: String,
    encrypt_priv: String,
    created: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    rotated_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rotated_at: Option<i64>,
}

/// A loaded identity with live key material.
pub struct Identity {
    pub sign: SigningKeyPair,
    pub encrypt: EncryptKeyPair,
    pub created: i64,
    pub rotated_from: Option<String>,
    pub rotated_at: Option<i64>,
}

impl Identity {
    fn generate(created: i64) -> Self {
        Self {
            sign: SigningKeyPair::generate(),
            encrypt: EncryptKeyPair::generate(),
            created,
            rotated_from: None,
            rotated_at: None,
        }
    }

    pub fn short_id(&self) -> Result<String, StoreError> {
        Ok(short_id(self.sign.public_hex())?)
    }

    /// Mint an invite bound to `subject`; returns the token and its encoded
    /// wire form. Recording the `InviteRecord` is the caller's concern.
    pub fn mint_invite(
        &self,
        subject_sign_pub: &str,
        sessions: Vec<String>,
        caps: Vec<String>,
        ttl_ms: i64,
    ) -> Result<(InviteToken, String), StoreError> {
        let token = InviteToken::mint(&self.sign, subject_sign_pub, sessions, caps, ttl_ms)?;
        let encoded = token.encode()?;
        Ok((token, encoded))
    }

    fn to_record(&self) -> IdentityRecord {
        IdentityRecord {
            sign_pub: self.sign.public_hex().to_string(),
            sign_priv: self.sign.secret_hex(),
            encrypt_pub: self.encrypt.public_hex().to_string(),
            encrypt_priv: self.encrypt.secret_hex(),
            created: self.created,
            rotated_from: self.rotated_from.clone(),
            rotated_at: self.rotated_at,
        }
    }

    fn from_record(record: IdentityRecord) -> Result<Self, StoreError> {
        let sign = SigningKeyPair::from_secret_hex(&record.sign_priv)?;
        let encrypt = EncryptKeyPair::from_secret_hex(&record.encrypt_priv)?;
        if sign.public_hex() != record.sign_pub || encrypt.public_hex() != record.encrypt_pub {
            return Err(StoreError::Corrupt(
                "identity public keys do not match private material".into(),
            ));
        }
        Ok(Self {
            sign,
            encrypt,
            created: record.created,
            rotated_from: record.rotated_from,
            rotated_at: record.rotated_at,
        })
    }
}

pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(IDENTITY_FILE),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Generate and persist a fresh identity. Refuses to overwrite an
    /// existing one unless `force`.
    pub fn init(&self, force: bool) -> Result<Identity, StoreError> {
        if self.exists() && !force {
            return Err(StoreError::AlreadyInitialized);
        }
        let identity = Identity::generate(now_ms());
        fs::write_json(&self.path, &identity.to_record())?;
        info!(short_id = %identity.short_id()?, "identity initialised");
        Ok(identity)
    }

    pub fn load(&self) -> Result<Identity, StoreError> {
        if !self.exists() {
            return Err(StoreError::NotInitialized);
        }
        let record: IdentityRecord = std::fs::read(&self.path)
            .map_err(StoreError::Io)
            .and_then(|bytes| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
            })?;
        Identity::from_record(record)
    }

    /// Replace the identity with fresh keys and return the rotation record
    /// (signed by the retiring key) for broadcast to peers.
    pub fn rotate(&self, reason: &str) -> Result<(Identity, KeyRotation), StoreError> {
        let old = self.load()?;
        let now = now_ms();

        let mut fresh = Identity::generate(now);
        fresh.rotated_from = Some(old.sign.public_hex().to_string());
        fresh.rotated_at = Some(now);

        let rotation = KeyRotation::create(
            &old.sign,
            fresh.sign.public_hex(),
            fresh.encrypt.public_hex(),
            reason,
            DEFAULT_GRACE_PERIOD_MS,
        )?;

        fs::write_json(&self.path, &fresh.to_record())?;
        info!(
            old = %short_id(&rotation.old_sign_pub)?,
            new = %fresh.short_id()?,
            "identity rotated"
        );
        Ok((fresh, rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let identity = store.init(false).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.sign.public_hex(), identity.sign.public_hex());
        assert_eq!(loaded.encrypt.public_hex(), identity.encrypt.public_hex());
        assert_eq!(loaded.short_id().unwrap().len(), 8);
    }

    #[test]
    fn init_refuses_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let first = store.init(false).unwrap();
        assert!(matches!(store.init(false), Err(StoreError::AlreadyInitialized)));

        let replaced = store.init(true).unwrap();
        assert_ne!(first.sign.public_hex(), replaced.sign.public_hex());
    }

    #[test]
    fn load_without_init_fails() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        assert!(matches!(store.load(), Err(StoreError::NotInitialized)));
    }

    #[test]
    fn rotate_links_old_identity_and_signs_with_it() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let old = store.init(false).unwrap();
        let (fresh, rotation) = store.rotate("compromise drill").unwrap();

        assert_eq!(fresh.rotated_from.as_deref(), Some(old.sign.public_hex()));
        assert_eq!(rotation.old_sign_pub, old.sign.public_hex());
        assert_eq!(rotation.new_sign_pub, fresh.sign.public_hex());
        rotation.verify().unwrap();

        // The persisted identity is the new one.
        let loaded = store.load().unwrap();
        assert_eq!(loaded.sign.public_hex(), fresh.sign.public_hex());
    }

    #[test]
    fn mint_invite_binds_subject() {
        let dir = tempdir().unwrap();
        let identity = IdentityStore::new(dir.path()).init(false).unwrap();
        let subject = SigningKeyPair::generate();
        let (token, encoded) = identity
            .mint_invite(subject.public_hex(), vec!["dev".into()], vec!["inject".into()], 60_000)
            .unwrap();
        assert_eq!(token.sub, subject.public_hex());
        assert_eq!(InviteToken::parse(&encoded).unwrap(), token);
    }
}
