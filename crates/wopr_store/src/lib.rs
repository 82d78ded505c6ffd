//! wopr_store — durable identity and trust state
//!
//! Four owner-only JSON files under one data directory:
//! - `identity.json` — this node's signing + encryption keypairs
//! - `peers.json`    — outbound peers (who WE may inject to)
//! - `access.json`   — inbound grants (who may inject to US)
//! - `invites.json`  — informational records of invites we minted
//!
//! All writes are atomic (temp file + rename); a crash mid-write never
//! produces a partially-valid store. Each store serialises its writers
//! behind one lock; reads clone out so callers never hold it.

pub mod access;
pub mod error;
pub mod fs;
pub mod identity;
pub mod invites;
pub mod models;
pub mod peers;

pub use access::AccessStore;
pub use error::StoreError;
pub use identity::{Identity, IdentityStore};
pub use invites::InviteStore;
pub use models::{AccessGrant, InviteRecord, KeyHistoryEntry, Peer};
pub use peers::PeerStore;
