//! Engine wiring.
//!
//! One `Engine` per node: identity + trust stores + rate/replay gates +
//! the external injection handler, all dependency-injected so the gates are
//! explicit per-process state rather than module globals. The listener and
//! client paths live in `listener` and `client`; this module owns the shared
//! state and the non-network operations (invite minting, rotation,
//! housekeeping).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wopr_proto::rotation::KeyRotation;
use wopr_proto::token::{CAP_INJECT, DEFAULT_TOKEN_TTL_MS};
use wopr_store::{AccessStore, Identity, IdentityStore, InviteStore, PeerStore};

use crate::{
    error::P2pError,
    ratelimit::{RateLimitConfig, RateLimiter},
    replay::ReplayProtector,
    transport::Transport,
};

/// Consumes decrypted payloads for delivery into the local agent. A handler
/// error is reported to the sender as `reject{"inject failed"}`; it never
/// tears down the listener.
#[async_trait]
pub trait InjectHandler: Send + Sync {
    async fn on_inject(&self, session: &str, plaintext: &str, from_sign_pub: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard timeout for the hello exchange, from first byte.
    pub handshake_timeout: Duration,
    /// Initiator round-trip timeout per request.
    pub request_timeout: Duration,
    pub rate_limits: RateLimitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

pub struct Engine {
    identity_store: IdentityStore,
    identity: RwLock<Arc<Identity>>,
    pub(crate) peers: PeerStore,
    pub(crate) access: AccessStore,
    pub(crate) invites: InviteStore,
    pub(crate) rate: RateLimiter,
    pub(crate) replay: ReplayProtector,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) handler: Arc<dyn InjectHandler>,
    pub(crate) config: EngineConfig,
}

impl Engine {
    /// Open all stores under `data_dir`. Requires an initialised identity
    /// (see [`IdentityStore::init`]).
    pub fn new(
        data_dir: &Path,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn InjectHandler>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, P2pError> {
        let identity_store = IdentityStore::new(data_dir);
        let identity = Arc::new(identity_store.load()?);
        Ok(Arc::new(Self {
            identity_store,
            identity: RwLock::new(identity),
            peers: PeerStore::open(data_dir)?,
            access: AccessStore::open(data_dir)?,
            invites: InviteStore::open(data_dir)?,
            rate: RateLimiter::new(config.rate_limits.clone()),
            replay: ReplayProtector::default(),
            transport,
            handler,
            config,
        }))
    }

    /// Snapshot of the current identity; safe to hold across awaits.
    pub fn identity(&self) -> Arc<Identity> {
        self.identity.read().clone()
    }

    pub fn short_id(&self) -> Result<String, P2pError> {
        Ok(self.identity().short_id()?)
    }

    pub fn peers(&self) -> &PeerStore {
        &self.peers
    }

    pub fn access(&self) -> &AccessStore {
        &self.access
    }

    pub fn invites(&self) -> &InviteStore {
        &self.invites
    }

    /// Mint an invite for `subject`, record it, and return the opaque
    /// string to hand over out-of-band.
    pub fn create_invite(
        &self,
        subject_sign_pub: &str,
        sessions: Vec<String>,
        ttl_ms: Option<i64>,
    ) -> Result<String, P2pError> {
        let identity = self.identity();
        let (token, encoded) = identity.mint_invite(
            subject_sign_pub,
            sessions,
            vec![CAP_INJECT.to_string()],
            ttl_ms.unwrap_or(DEFAULT_TOKEN_TTL_MS),
        )?;
        self.invites.record(&token, &encoded)?;
        Ok(encoded)
    }

    /// Rotate this node's identity. Returns the rotation record to
    /// broadcast; the listener must be re-joined afterwards since the
    /// rendezvous topic follows the signing key.
    pub fn rotate_identity(&self, reason: &str) -> Result<KeyRotation, P2pError> {
        let (fresh, rotation) = self.identity_store.rotate(reason)?;
        *self.identity.write() = Arc::new(fresh);
        Ok(rotation)
    }

    /// Periodic upkeep: expire rotation grace windows and prune the replay
    /// set. Idempotent; run from an interval task.
    pub fn housekeeping(&self) -> Result<(), P2pError> {
        let grants = self.access.cleanup_expired_key_history()?;
        let peers = self.peers.cleanup_expired_key_history()?;
        self.replay.cleanup();
        if grants + peers > 0 {
            debug!(grants, peers, "housekeeping pruned expired key history");
        }
        Ok(())
    }

    /// Release the transport. Listener handles abort independently.
    pub async fn shutdown(&self) {
        self.transport.destroy().await;
    }

    /// Run [`Self::housekeeping`] on a fixed interval until the returned
    /// task is aborted or the runtime shuts down.
    pub fn spawn_housekeeping(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(err) = engine.housekeeping() {
                    warn!(error = %err, "housekeeping failed");
                }
            }
        })
    }
}
