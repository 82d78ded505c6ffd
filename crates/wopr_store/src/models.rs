//! Persisted record shapes.
//!
//! Field names match the on-disk JSON exactly (camelCase); timestamps are
//! milliseconds since epoch, keys are hex strings.

use serde::{Deserialize, Serialize};

/// One retired key of a logical peer. The key keeps inbound authorisation
/// while `now < valid_until` (the rotation grace window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyHistoryEntry {
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypt_pub: Option<String>,
    pub valid_from: i64,
    pub valid_until: i64,
    pub reason: String,
}

/// Outbound: a peer WE may inject to, created by claiming their invite.
/// `sessions` is advisory — the remote side enforces its own grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Short id, first 8 hex chars of SHA-256 over `public_key`.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Current signing public key (hex).
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypt_pub: Option<String>,
    pub sessions: Vec<String>,
    pub caps: Vec<String>,
    pub added: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_history: Vec<KeyHistoryEntry>,
}

/// Inbound: a grant authorising a peer's signing key to inject into the
/// listed sessions on THIS node. Authoritative; revocation is logical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub id: String,
    pub peer_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_encrypt_pub: Option<String>,
    pub sessions: Vec<String>,
    pub caps: Vec<String>,
    pub created: i64,
    #[serde(default)]
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_history: Vec<KeyHistoryEntry>,
}

/// Informational record of an invite we minted. The cryptographic binding
/// lives in the token itself; losing this record loses nothing but history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRecord {
    pub token: String,
    pub peer_key: String,
    pub sessions: Vec<String>,
    pub created: i64,
    pub expires: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
}

/// Matches a grant or peer against any key that identifies it: the current
/// key, or a history key still inside its validity window.
pub(crate) fn history_matches(history: &[KeyHistoryEntry], key: &str, now: i64) -> bool {
    history
        .iter()
        .any(|h| h.public_key == key && now < h.valid_until)
}

/// "*" grants every session.
pub(crate) fn sessions_allow(sessions: &[String], session: &str) -> bool {
    sessions.iter().any(|s| s == "*" || s == session)
}
