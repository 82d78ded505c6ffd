//! Invite bookkeeping.
//!
//! Records here are informational: the cryptographic single-use binding is
//! carried by the token itself (`sub` + signature + claim-side checks), so a
//! missing record is never an error. `mark_claimed` is best-effort and never
//! re-mutates an already-claimed record.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use wopr_proto::token::InviteToken;
use wopr_proto::now_ms;

use crate::{error::StoreError, fs, models::InviteRecord};

pub const INVITES_FILE: &str = "invites.json";

pub struct InviteStore {
    path: PathBuf,
    invites: RwLock<Vec<InviteRecord>>,
}

impl InviteStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(INVITES_FILE);
        let invites = fs::read_json_or_default(&path)?;
        Ok(Self {
            path,
            invites: RwLock::new(invites),
        })
    }

    fn persist(&self, invites: &[InviteRecord]) -> Result<(), StoreError> {
        fs::write_json(&self.path, &invites)
    }

    pub fn list(&self) -> Vec<InviteRecord> {
        self.invites.read().clone()
    }

    /// Record a freshly minted invite.
    pub fn record(&self, token: &InviteToken, encoded: &str) -> Result<InviteRecord, StoreError> {
        let record = InviteRecord {
            token: encoded.to_string(),
            peer_key: token.sub.clone(),
            sessions: token.ses.clone(),
            created: token.iat,
            expires: token.exp,
            claimed_at: None,
            claimed_by: None,
        };
        let mut invites = self.invites.write();
        invites.push(record.clone());
        self.persist(&invites)?;
        Ok(record)
    }

    /// Mark the record for `encoded` claimed by `claimed_by`. Returns true
    /// if a record transitioned; a missing or already-claimed record is a
    /// no-op (the token's own checks carry the real guarantees).
    pub fn mark_claimed(&self, encoded: &str, claimed_by: &str) -> Result<bool, StoreError> {
        let mut invites = self.invites.write();
        match invites.iter_mut().find(|r| r.token == encoded) {
            Some(record) if record.claimed_at.is_none() => {
                record.claimed_at = Some(now_ms());
                record.claimed_by = Some(claimed_by.to_string());
                self.persist(&invites)?;
                Ok(true)
            }
            Some(_) => {
                debug!("invite already claimed; record unchanged");
                Ok(false)
            }
            None => {
                debug!("no invite record for claimed token");
                Ok(false)
            }
        }
    }

    /// User-driven removal of a record by its encoded token.
    pub fn remove(&self, encoded: &str) -> Result<(), StoreError> {
        let mut invites = self.invites.write();
        let before = invites.len();
        invites.retain(|r| r.token != encoded);
        if invites.len() == before {
            return Err(StoreError::NotFound("invite".into()));
        }
        self.persist(&invites)
    }
}
