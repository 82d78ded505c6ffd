//! Outbound peers — who WE can inject to.
//!
//! A peer record is created by successfully claiming their invite. Its
//! `sessions` list is advisory (the remote enforces its own grants); keeping
//! it accurate just saves a doomed connection. Key rotations received from
//! the peer move the record to the new keys, mirroring the grant store.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};

use wopr_crypto::hash::short_id;
use wopr_proto::rotation::KeyRotation;
use wopr_proto::now_ms;

use crate::{
    error::StoreError,
    fs,
    models::{KeyHistoryEntry, Peer},
};

pub const PEERS_FILE: &str = "peers.json";

pub struct PeerStore {
    path: PathBuf,
    peers: RwLock<Vec<Peer>>,
}

impl PeerStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(PEERS_FILE);
        let peers = fs::read_json_or_default(&path)?;
        Ok(Self {
            path,
            peers: RwLock::new(peers),
        })
    }

    fn persist(&self, peers: &[Peer]) -> Result<(), StoreError> {
        fs::write_json(&self.path, &peers)
    }

    pub fn list(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }

    /// Record a peer after a successful claim. A re-claim against the same
    /// key unions sessions and refreshes the encryption key.
    pub fn add(
        &self,
        public_key: &str,
        encrypt_pub: Option<&str>,
        sessions: &[String],
        caps: &[String],
        name: Option<&str>,
    ) -> Result<Peer, StoreError> {
        let mut peers = self.peers.write();
        let peer = match peers.iter_mut().find(|p| p.public_key == public_key) {
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
                if let Some(enc) = encrypt_pub {
                    existing.encrypt_pub = Some(enc.to_string());
                }
                existing.clone()
            }
            None => {
                let peer = Peer {
                    id: short_id(public_key)?,
                    name: name.map(str::to_string),
                    public_key: public_key.to_string(),
                    encrypt_pub: encrypt_pub.map(str::to_string),
                    sessions: sessions.to_vec(),
                    caps: caps.to_vec(),
                    added: now_ms(),
                    key_history: Vec::new(),
                };
                peers.push(peer.clone());
                peer
            }
        };
        self.persist(&peers)?;
        info!(peer = %peer.id, "peer recorded");
        Ok(peer)
    }

    /// Look up by short id or name.
    pub fn get(&self, id_or_name: &str) -> Option<Peer> {
        self.peers
            .read()
            .iter()
            .find(|p| p.id == id_or_name || p.name.as_deref() == Some(id_or_name))
            .cloned()
    }

    pub fn rename(&self, id_or_name: &str, new_name: &str) -> Result<(), StoreError> {
        let mut peers = self.peers.write();
        let peer = peers
            .iter_mut()
            .find(|p| p.id == id_or_name || p.name.as_deref() == Some(id_or_name))
            .ok_or_else(|| StoreError::NotFound(id_or_name.to_string()))?;
        peer.name = Some(new_name.to_string());
        self.persist(&peers)
    }

    /// Replace the advisory session list (e.g. after the remote re-invited
    /// us with different sessions).
    pub fn set_sessions(&self, id_or_name: &str, sessions: Vec<String>) -> Result<(), StoreError> {
        let mut peers = self.peers.write();
        let peer = peers
            .iter_mut()
            .find(|p| p.id == id_or_name || p.name.as_deref() == Some(id_or_name))
            .ok_or_else(|| StoreError::NotFound(id_or_name.to_string()))?;
        peer.sessions = sessions;
        self.persist(&peers)
    }

    pub fn forget(&self, id_or_name: &str) -> Result<(), StoreError> {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| p.id != id_or_name && p.name.as_deref() != Some(id_or_name));
        if peers.len() == before {
            return Err(StoreError::NotFound(id_or_name.to_string()));
        }
        self.persist(&peers)?;
        info!(peer = %id_or_name, "peer forgotten");
        Ok(())
    }

    /// Mirror of `AccessStore::process_key_rotation` for the outbound side.
    pub fn process_key_rotation(&self, rotation: &KeyRotation) -> Result<bool, StoreError> {
        let mut peers = self.peers.write();
        let Some(peer) = peers.iter_mut().find(|p| p.public_key == rotation.old_sign_pub) else {
            debug!(old = %rotation.old_sign_pub, "key rotation matched no peer");
            return Ok(false);
        };

        peer.key_history.push(KeyHistoryEntry {
            public_key: peer.public_key.clone(),
            encrypt_pub: peer.encrypt_pub.clone(),
            valid_from: peer.added,
            valid_until: rotation.valid_until(),
            reason: rotation.reason.clone(),
        });
        peer.public_key = rotation.new_sign_pub.clone();
        peer.encrypt_pub = Some(rotation.new_encrypt_pub.clone());
        peer.id = short_id(&peer.public_key)?;

        let id = peer.id.clone();
        self.persist(&peers)?;
        info!(peer = %id, "peer key rotated");
        Ok(true)
    }

    pub fn cleanup_expired_key_history(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut peers = self.peers.write();
        let mut dropped = 0;
        for p in peers.iter_mut() {
            let before = p.key_history.len();
            p.key_history.retain(|h| h.valid_until > now);
            dropped += before - p.key_history.len();
        }
        if dropped > 0 {
            self.persist(&peers)?;
        }
        Ok(dropped)
    }
}
