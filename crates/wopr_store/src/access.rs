//! Inbound access grants — the authoritative trust store.
//!
//! `is_authorized` is the hot path on every inject: a sender key authorises
//! iff a non-revoked grant carries the `inject` cap for the session and the
//! key is either the grant's current key or a history key still inside its
//! rotation grace window.
//!
//! At most one non-revoked grant exists per current peer key; repeated
//! claims union their sessions/caps into the existing grant.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};

use wopr_crypto::hash::short_id;
use wopr_proto::rotation::KeyRotation;
use wopr_proto::now_ms;

use crate::{
    error::StoreError,
    fs,
    models::{history_matches, sessions_allow, AccessGrant, KeyHistoryEntry},
};

pub const ACCESS_FILE: &str = "access.json";

pub struct AccessStore {
    path: PathBuf,
    grants: RwLock<Vec<AccessGrant>>,
}

impl AccessStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(ACCESS_FILE);
        let grants = fs::read_json_or_default(&path)?;
        Ok(Self {
            path,
            grants: RwLock::new(grants),
        })
    }

    fn persist(&self, grants: &[AccessGrant]) -> Result<(), StoreError> {
        fs::write_json(&self.path, &grants)
    }

    pub fn list(&self) -> Vec<AccessGrant> {
        self.grants.read().clone()
    }

    /// Create or widen a grant for `peer_key`. An existing non-revoked grant
    /// absorbs the new sessions/caps and refreshes the encryption key.
    pub fn grant_access(
        &self,
        peer_key: &str,
        sessions: &[String],
        caps: &[String],
        peer_encrypt_pub: Option<&str>,
        peer_name: Option<&str>,
    ) -> Result<AccessGrant, StoreError> {
        let mut grants = self.grants.write();
        let grant = match grants.iter_mut().find(|g| !g.revoked && g.peer_key == peer_key) {
            Some(existing) => {
                for s in sessions {
                    if !existing.sessions.contains(s) {
                        existing.sessions.push(s.clone());
                    }
                }
                for c in caps {
                    if !existing.caps.contains(c) {
                        existing.caps.push(c.clone());
                    }
                }
                if let Some(enc) = peer_encrypt_pub {
                    existing.peer_encrypt_pub = Some(enc.to_string());
                }
                if existing.peer_name.is_none() {
                    existing.peer_name = peer_name.map(str::to_string);
                }
                existing.clone()
            }
            None => {
                let grant = AccessGrant {
                    id: short_id(peer_key)?,
                    peer_key: peer_key.to_string(),
                    peer_encrypt_pub: peer_encrypt_pub.map(str::to_string),
                    sessions: sessions.to_vec(),
                    caps: caps.to_vec(),
                    created: now_ms(),
                    revoked: false,
                    peer_name: peer_name.map(str::to_string),
                    key_history: Vec::new(),
                };
                grants.push(grant.clone());
                grant
            }
        };
        self.persist(&grants)?;
        info!(peer = %grant.id, sessions = ?grant.sessions, "access granted");
        Ok(grant)
    }

    /// True iff `sender` may inject into `session` right now.
    pub fn is_authorized(&self, sender_sign_pub: &str, session: &str) -> bool {
        let now = now_ms();
        self.grants.read().iter().any(|g| {
            !g.revoked
                && g.caps.iter().any(|c| c == "inject")
                && sessions_allow(&g.sessions, session)
                && (g.peer_key == sender_sign_pub
                    || history_matches(&g.key_history, sender_sign_pub, now))
        })
    }

    /// The grant a sender key maps to (current or unexpired historical).
    /// Used to recover the peer's static encryption key for v1 payloads.
    pub fn grant_for_peer(&self, sender_sign_pub: &str) -> Option<AccessGrant> {
        let now = now_ms();
        self.grants
            .read()
            .iter()
            .find(|g| {
                !g.revoked
                    && (g.peer_key == sender_sign_pub
                        || history_matches(&g.key_history, sender_sign_pub, now))
            })
            .cloned()
    }

    /// The static encryption key that matches `sender` specifically: the
    /// grant's current key, or the one archived with a historical signing
    /// key still in grace (a sender on its old identity seals with its old
    /// static key).
    pub fn encrypt_pub_for_sender(&self, sender_sign_pub: &str) -> Option<String> {
        let now = now_ms();
        let grants = self.grants.read();
        for g in grants.iter().filter(|g| !g.revoked) {
            if g.peer_key == sender_sign_pub {
                return g.peer_encrypt_pub.clone();
            }
            if let Some(h) = g
                .key_history
                .iter()
                .find(|h| h.public_key == sender_sign_pub && now < h.valid_until)
            {
                return h.encrypt_pub.clone();
            }
        }
        None
    }

    /// Logically delete the grant matching a short id or peer name.
    pub fn revoke(&self, id_or_name: &str) -> Result<(), StoreError> {
        let mut grants = self.grants.write();
        let grant = grants
            .iter_mut()
            .find(|g| {
                !g.revoked && (g.id == id_or_name || g.peer_name.as_deref() == Some(id_or_name))
            })
            .ok_or_else(|| StoreError::NotFound(id_or_name.to_string()))?;
        grant.revoked = true;
        let id = grant.id.clone();
        self.persist(&grants)?;
        info!(peer = %id, "grant revoked");
        Ok(())
    }

    /// Apply a VERIFIED key rotation: the grant currently held by the old
    /// key gains a history entry and moves to the new key pair. Returns true
    /// iff a record was updated; re-delivery is a state no-op.
    pub fn process_key_rotation(&self, rotation: &KeyRotation) -> Result<bool, StoreError> {
        let mut grants = self.grants.write();
        let Some(grant) = grants
            .iter_mut()
            .find(|g| !g.revoked && g.peer_key == rotation.old_sign_pub)
        else {
            debug!(old = %rotation.old_sign_pub, "key rotation matched no grant");
            return Ok(false);
        };

        grant.key_history.push(KeyHistoryEntry {
            public_key: grant.peer_key.clone(),
            encrypt_pub: grant.peer_encrypt_pub.clone(),
            valid_from: grant.created,
            valid_until: rotation.valid_until(),
            reason: rotation.reason.clone(),
        });
        grant.peer_key = rotation.new_sign_pub.clone();
        grant.peer_encrypt_pub = Some(rotation.new_encrypt_pub.clone());
        grant.id = short_id(&grant.peer_key)?;

        let id = grant.id.clone();
        self.persist(&grants)?;
        info!(peer = %id, until = rotation.valid_until(), "peer key rotated; old key in grace");
        Ok(true)
    }

    /// Drop history entries whose grace window has closed. Idempotent.
    pub fn cleanup_expired_key_history(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut grants = self.grants.write();
        let mut dropped = 0;
        for g in grants.iter_mut() {
            let before = g.key_history.len();
            g.key_history.retain(|h| h.valid_until > now);
            dropped += before - g.key_history.len();
        }
        if dropped > 0 {
            self.persist(&grants)?;
            debug!(dropped, "expired key history pruned");
        }
        Ok(dropped)
    }
}
