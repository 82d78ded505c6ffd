//! End-to-end protocol scenarios over the in-memory transport: two (or
//! three) full nodes with real stores in temp dirs, a live listener each,
//! and the actual wire frames in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::time::timeout;

use wopr_crypto::ecdh::{encrypt_static, EphemeralKeyPair};
use wopr_crypto::hash::{short_id, topic_of};
use wopr_crypto::identity::{EncryptKeyPair, SigningKeyPair};
use wopr_p2p::transport::memory::MemoryTransport;
use wopr_p2p::transport::{BoxedConnection, Connection, Role, Transport};
use wopr_p2p::{Engine, EngineConfig, InjectHandler, ListenerHandle, Outcome};
use wopr_proto::frame::{Frame, FrameBody};
use wopr_proto::token::InviteToken;
use wopr_store::IdentityStore;

#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<(String, String, String)>>,
    fail: AtomicBool,
}

#[async_trait]
impl InjectHandler for RecordingHandler {
    async fn on_inject(&self, session: &str, plaintext: &str, from_sign_pub: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("agent backend offline");
        }
        self.calls
            .lock()
            .push((session.to_string(), plaintext.to_string(), from_sign_pub.to_string()));
        Ok(())
    }
}

struct Node {
    _dir: TempDir,
    engine: Arc<Engine>,
    handler: Arc<RecordingHandler>,
    _listener: ListenerHandle,
}

impl Node {
    fn sign_pub(&self) -> String {
        self.engine.identity().sign.public_hex().to_string()
    }
}

async fn spawn_node(hub: &Arc<MemoryTransport>, config: EngineConfig) -> Node {
    let dir = tempfile::tempdir().unwrap();
    IdentityStore::new(dir.path()).init(false).unwrap();
    let handler = Arc::new(RecordingHandler::default());
    let transport: Arc<dyn Transport> = hub.clone();
    let engine = Engine::new(dir.path(), transport, handler.clone(), config).unwrap();
    let listener = engine.listen().await.unwrap();
    Node {
        _dir: dir,
        engine,
        handler,
        _listener: listener,
    }
}

async fn default_node(hub: &Arc<MemoryTransport>) -> Node {
    spawn_node(hub, EngineConfig::default()).await
}

/// Claim an invite from `issuer` on `claimer` and assert success.
async fn establish(issuer: &Node, claimer: &Node, sessions: &[&str]) -> String {
    let invite = issuer
        .engine
        .create_invite(
            &claimer.sign_pub(),
            sessions.iter().map(|s| s.to_string()).collect(),
            None,
        )
        .unwrap();
    assert_eq!(claimer.engine.claim_invite(&invite).await, Outcome::Ok);
    short_id(&issuer.sign_pub()).unwrap()
}

// ── Raw wire access, for the adversarial cases ───────────────────────────────

async fn raw_dial(hub: &Arc<MemoryTransport>, peer_sign_pub: &str) -> BoxedConnection {
    let mut rx = hub
        .join(topic_of(peer_sign_pub).unwrap(), Role::Client)
        .await
        .unwrap();
    rx.recv().await.unwrap()
}

async fn raw_send(conn: &mut BoxedConnection, frame: &Frame) {
    conn.write_line(&frame.to_line().unwrap()).await.unwrap();
}

async fn raw_read(conn: &mut BoxedConnection) -> Option<Frame> {
    match timeout(Duration::from_millis(500), conn.read_line()).await {
        Ok(Ok(Some(line))) => Some(Frame::from_line(&line).unwrap()),
        _ => None,
    }
}

/// Dial and complete the hello exchange as `sign`, returning the open
/// connection (panics if the responder refuses).
async fn raw_handshake(hub: &Arc<MemoryTransport>, peer_sign_pub: &str, sign: &SigningKeyPair) -> BoxedConnection {
    let mut conn = raw_dial(hub, peer_sign_pub).await;
    let hello = Frame::signed(
        sign,
        FrameBody::Hello {
            versions: vec![1, 2],
            ephemeral_pub: Some(EphemeralKeyPair::generate().public_hex().to_string()),
        },
    )
    .unwrap();
    raw_send(&mut conn, &hello).await;
    let ack = raw_read(&mut conn).await.expect("hello-ack");
    assert!(matches!(ack.body, FrameBody::HelloAck { .. }));
    conn
}

// ── S1: happy claim + inject ─────────────────────────────────────────────────

#[tokio::test]
async fn claim_then_inject_end_to_end() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b = default_node(&hub).await;

    let a_id = establish(&a, &b, &["dev"]).await;

    // Issuer side: grant recorded and invite marked claimed.
    assert!(a.engine.access().is_authorized(&b.sign_pub(), "dev"));
    let invites = a.engine.invites().list();
    assert_eq!(invites[0].claimed_by.as_deref(), Some(b.sign_pub().as_str()));
    assert!(invites[0].claimed_at.is_some());

    // Claimer side: peer recorded with the issuer's encryption key.
    let peer = b.engine.peers().get(&a_id).unwrap();
    assert_eq!(peer.public_key, a.sign_pub());
    assert_eq!(peer.sessions, vec!["dev".to_string()]);
    assert_eq!(
        peer.encrypt_pub.as_deref(),
        Some(a.engine.identity().encrypt.public_hex())
    );

    assert_eq!(b.engine.inject(&a_id, "dev", "hello").await, Outcome::Ok);
    let calls = a.handler.calls.lock().clone();
    assert_eq!(calls, vec![("dev".to_string(), "hello".to_string(), b.sign_pub())]);
}

// ── S2: unauthorized session, locally and remotely ───────────────────────────

#[tokio::test]
async fn unauthorized_session_fails_locally_then_remotely() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b = default_node(&hub).await;
    let a_id = establish(&a, &b, &["dev"]).await;

    // Local advisory check refuses before any connection is opened.
    assert_eq!(
        b.engine.inject(&a_id, "prod", "x").await,
        Outcome::Rejected("session not permitted: prod".to_string())
    );

    // A peer that edits its own record still hits the authoritative grant.
    b.engine
        .peers()
        .set_sessions(&a_id, vec!["prod".to_string(), "dev".to_string()])
        .unwrap();
    assert_eq!(
        b.engine.inject(&a_id, "prod", "x").await,
        Outcome::Rejected("unauthorized".to_string())
    );
    assert!(a.handler.calls.lock().is_empty());
}

// ── S3: token misuse ─────────────────────────────────────────────────────────

#[tokio::test]
async fn token_claimed_by_wrong_peer_is_rejected() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b = default_node(&hub).await;
    let c = default_node(&hub).await;

    let invite = a
        .engine
        .create_invite(&b.sign_pub(), vec!["dev".to_string()], None)
        .unwrap();

    // C somehow obtained B's token; the bearer binding defeats it.
    assert_eq!(
        c.engine.claim_invite(&invite).await,
        Outcome::Rejected("token not issued for you".to_string())
    );
    assert!(!a.engine.access().is_authorized(&c.sign_pub(), "dev"));
}

#[tokio::test]
async fn token_issued_elsewhere_is_rejected() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;

    // A token minted by a stranger, presented to A's listener directly.
    let stranger = SigningKeyPair::generate();
    let token = InviteToken::mint(
        &stranger,
        stranger.public_hex(),
        vec!["dev".to_string()],
        vec!["inject".to_string()],
        60_000,
    )
    .unwrap();

    let mut conn = raw_handshake(&hub, &a.sign_pub(), &stranger).await;
    let claim = Frame::signed(
        &stranger,
        FrameBody::Claim {
            token: token.encode().unwrap(),
            encrypt_pub: EncryptKeyPair::generate().public_hex().to_string(),
        },
    )
    .unwrap();
    raw_send(&mut conn, &claim).await;

    let reply = raw_read(&mut conn).await.unwrap();
    assert_eq!(
        reply.body,
        FrameBody::Reject {
            reason: "token not issued by this peer".to_string(),
            session: None
        }
    );
}

#[tokio::test]
async fn expired_token_is_rejected_by_issuer() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b_keys = SigningKeyPair::generate();

    let invite = a
        .engine
        .create_invite(b_keys.public_hex(), vec!["dev".to_string()], Some(-60_000))
        .unwrap();

    let mut conn = raw_handshake(&hub, &a.sign_pub(), &b_keys).await;
    let claim = Frame::signed(
        &b_keys,
        FrameBody::Claim {
            token: invite,
            encrypt_pub: EncryptKeyPair::generate().public_hex().to_string(),
        },
    )
    .unwrap();
    raw_send(&mut conn, &claim).await;

    let reply = raw_read(&mut conn).await.unwrap();
    assert_eq!(
        reply.body,
        FrameBody::Reject {
            reason: "token expired".to_string(),
            session: None
        }
    );
}

// ── S4: key rotation with grace ──────────────────────────────────────────────

#[tokio::test]
async fn rotation_propagates_and_injection_continues() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b = default_node(&hub).await;
    let a_id = establish(&a, &b, &["dev"]).await;
    let old_a_pub = a.sign_pub();

    let rotation = a.engine.rotate_identity("scheduled").unwrap();
    // The rendezvous topic follows the signing key; re-join it.
    let _new_listener = a.engine.listen().await.unwrap();

    let results = a.engine.broadcast_rotation(&rotation).await;
    assert_eq!(results, vec![(b.sign_pub(), Outcome::Ok)]);

    // B's peer record moved to the new key, old key in grace history.
    let new_a_id = short_id(&a.sign_pub()).unwrap();
    let peer = b.engine.peers().get(&new_a_id).unwrap();
    assert_eq!(peer.public_key, a.sign_pub());
    assert_eq!(peer.key_history.len(), 1);
    assert_eq!(peer.key_history[0].public_key, old_a_pub);
    assert!(b.engine.peers().get(&a_id).is_none());

    // Injection keeps working against the rotated identity.
    assert_eq!(b.engine.inject(&new_a_id, "dev", "still here").await, Outcome::Ok);
    assert_eq!(a.handler.calls.lock().len(), 1);

    // Re-delivery of the same rotation changes nothing and is refused.
    assert_eq!(
        a.engine.broadcast_rotation(&rotation).await,
        vec![(b.sign_pub(), Outcome::Rejected("invalid key rotation".to_string()))]
    );
    assert_eq!(b.engine.peers().get(&new_a_id).unwrap(), peer);
}

// ── S5: replay ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn replayed_frames_are_dropped_then_source_blocked() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b = default_node(&hub).await;
    establish(&a, &b, &["dev"]).await;

    let b_identity = b.engine.identity();
    let a_encrypt_pub = a.engine.identity().encrypt.public_hex().to_string();

    // A legitimate v1-style inject frame, captured by an attacker.
    let payload = encrypt_static(b"replay me", &b_identity.encrypt, &a_encrypt_pub).unwrap();
    let frame = Frame::signed(
        &b_identity.sign,
        FrameBody::Inject {
            session: "dev".to_string(),
            payload,
            encrypt_pub: Some(b_identity.encrypt.public_hex().to_string()),
            ephemeral_pub: None,
        },
    )
    .unwrap();

    // Original delivery succeeds.
    let mut conn = raw_handshake(&hub, &a.sign_pub(), &b_identity.sign).await;
    raw_send(&mut conn, &frame).await;
    assert!(matches!(raw_read(&mut conn).await.unwrap().body, FrameBody::Ack { .. }));
    assert_eq!(a.handler.calls.lock().len(), 1);

    // Re-sends of the identical frame are silently dropped and charged.
    for _ in 0..4 {
        let mut conn = raw_handshake(&hub, &a.sign_pub(), &b_identity.sign).await;
        raw_send(&mut conn, &frame).await;
        assert!(raw_read(&mut conn).await.is_none(), "replay must get no reply");
    }
    assert_eq!(a.handler.calls.lock().len(), 1);

    // The source is now blocked outright: no hello-ack at all.
    let mut conn = raw_dial(&hub, &a.sign_pub()).await;
    let hello = Frame::signed(
        &b_identity.sign,
        FrameBody::Hello {
            versions: vec![1, 2],
            ephemeral_pub: None,
        },
    )
    .unwrap();
    raw_send(&mut conn, &hello).await;
    assert!(raw_read(&mut conn).await.is_none());
}

// ── S6: version mismatch ─────────────────────────────────────────────────────

#[tokio::test]
async fn responder_rejects_unsupported_versions() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;

    let stranger = SigningKeyPair::generate();
    let mut conn = raw_dial(&hub, &a.sign_pub()).await;
    let hello = Frame::signed(
        &stranger,
        FrameBody::Hello {
            versions: vec![0],
            ephemeral_pub: None,
        },
    )
    .unwrap();
    raw_send(&mut conn, &hello).await;

    let reply = raw_read(&mut conn).await.unwrap();
    assert_eq!(
        reply.body,
        FrameBody::Reject {
            reason: "no common protocol version".to_string(),
            session: None
        }
    );
}

#[tokio::test]
async fn initiator_maps_version_mismatch() {
    let hub = MemoryTransport::new();
    let b = default_node(&hub).await;

    // A hand-rolled listener that speaks no common version.
    let legacy_sign = SigningKeyPair::generate();
    let legacy_encrypt = EncryptKeyPair::generate();
    b.engine
        .peers()
        .add(
            legacy_sign.public_hex(),
            Some(legacy_encrypt.public_hex()),
            &["dev".to_string()],
            &["inject".to_string()],
            None,
        )
        .unwrap();
    let legacy_id = short_id(legacy_sign.public_hex()).unwrap();

    let mut incoming = hub
        .join(topic_of(legacy_sign.public_hex()).unwrap(), Role::Server)
        .await
        .unwrap();
    tokio::spawn(async move {
        let mut conn = incoming.recv().await.unwrap();
        let _hello = conn.read_line().await.unwrap();
        let reject = Frame::signed(
            &legacy_sign,
            FrameBody::Reject {
                reason: "no common protocol version".to_string(),
                session: None,
            },
        )
        .unwrap();
        conn.write_line(&reject.to_line().unwrap()).await.unwrap();
    });

    assert_eq!(b.engine.inject(&legacy_id, "dev", "x").await, Outcome::VersionMismatch);
}

// ── Outcome mapping and hardening odds and ends ──────────────────────────────

#[tokio::test]
async fn unknown_peer_is_invalid_and_unreachable_peer_is_offline() {
    let hub = MemoryTransport::new();
    let b = default_node(&hub).await;

    assert!(matches!(
        b.engine.inject("deadbeef", "dev", "x").await,
        Outcome::Invalid(_)
    ));

    // Known peer, but nobody serves its topic.
    let ghost_sign = SigningKeyPair::generate();
    b.engine
        .peers()
        .add(
            ghost_sign.public_hex(),
            Some(EncryptKeyPair::generate().public_hex()),
            &["dev".to_string()],
            &["inject".to_string()],
            None,
        )
        .unwrap();
    let ghost_id = short_id(ghost_sign.public_hex()).unwrap();
    assert_eq!(b.engine.inject(&ghost_id, "dev", "x").await, Outcome::Offline);
}

#[tokio::test]
async fn handler_failure_rejects_without_killing_listener() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b = default_node(&hub).await;
    let a_id = establish(&a, &b, &["dev"]).await;

    a.handler.fail.store(true, Ordering::SeqCst);
    assert_eq!(
        b.engine.inject(&a_id, "dev", "doomed").await,
        Outcome::Rejected("inject failed".to_string())
    );

    a.handler.fail.store(false, Ordering::SeqCst);
    assert_eq!(b.engine.inject(&a_id, "dev", "recovered").await, Outcome::Ok);
    assert_eq!(a.handler.calls.lock().len(), 1);
}

#[tokio::test]
async fn inject_flood_is_rate_limited() {
    let hub = MemoryTransport::new();
    let mut config = EngineConfig::default();
    config.rate_limits.injects.max_requests = 2;
    config.rate_limits.injects.window_ms = 60_000;
    let a = spawn_node(&hub, config).await;
    let b = default_node(&hub).await;
    let a_id = establish(&a, &b, &["dev"]).await;

    assert_eq!(b.engine.inject(&a_id, "dev", "1").await, Outcome::Ok);
    assert_eq!(b.engine.inject(&a_id, "dev", "2").await, Outcome::Ok);
    assert_eq!(b.engine.inject(&a_id, "dev", "3").await, Outcome::RateLimited);
    assert_eq!(a.handler.calls.lock().len(), 2);
}

#[tokio::test]
async fn revoked_grant_stops_injection() {
    let hub = MemoryTransport::new();
    let a = default_node(&hub).await;
    let b = default_node(&hub).await;
    let a_id = establish(&a, &b, &["dev"]).await;

    assert_eq!(b.engine.inject(&a_id, "dev", "before").await, Outcome::Ok);

    let b_short = short_id(&b.sign_pub()).unwrap();
    a.engine.access().revoke(&b_short).unwrap();
    assert_eq!(
        b.engine.inject(&a_id, "dev", "after").await,
        Outcome::Rejected("unauthorized".to_string())
    );
    assert_eq!(a.handler.calls.lock().len(), 1);
}
