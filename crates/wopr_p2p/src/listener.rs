//! Responder side of the protocol.
//!
//! The listener joins this node's own topic in server mode and handles each
//! inbound connection in its own task. Per connection the state machine is
//! strictly sequential: hello → hello-ack → exactly one typed request →
//! ack/reject → close.
//!
//! Suspected adversarial input (unparseable, unsigned, replayed, tampered)
//! is charged to the `invalidMessages` limit class and dropped WITHOUT a
//! reply, so probes get no feedback. Legitimate authorisation failures get
//! an explicit `reject` with a human-readable reason.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use wopr_crypto::ecdh::{decrypt_static, decrypt_with_ephemeral, EphemeralKeyPair};
use wopr_crypto::hash::{short_id, topic_of};
use wopr_proto::frame::{Frame, FrameBody, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
use wopr_proto::token::InviteToken;
use wopr_proto::now_ms;
use wopr_store::Identity;

use crate::engine::Engine;
use crate::error::{P2pError, REASON_NO_COMMON_VERSION, REASON_RATE_LIMITED};
use crate::ratelimit::LimitClass;
use crate::transport::{BoxedConnection, Connection as _, Role};

pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Engine {
    /// Join our own topic in server mode and serve connections until the
    /// handle is dropped. A crash in one connection's handler never affects
    /// another; each runs in its own task.
    pub async fn listen(self: &Arc<Self>) -> Result<ListenerHandle, P2pError> {
        let identity = self.identity();
        let topic = topic_of(identity.sign.public_hex())?;
        let mut incoming = self
            .transport
            .join(topic, Role::Server)
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        info!(short_id = %identity.short_id()?, "listening for peers");

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(conn) = incoming.recv().await {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    respond(engine, conn).await;
                });
            }
        });
        Ok(ListenerHandle { task })
    }
}

fn reject(reason: &str, session: Option<String>) -> FrameBody {
    FrameBody::Reject {
        reason: reason.to_string(),
        session,
    }
}

/// Charge one invalid-message strike against `peer` and say why at debug.
fn charge_invalid(engine: &Engine, peer: &str, why: &str) {
    debug!(peer, why, "invalid frame dropped");
    engine.rate.check(peer, LimitClass::InvalidMessages);
}

async fn send(identity: &Identity, conn: &mut BoxedConnection, body: FrameBody) -> Result<(), P2pError> {
    let frame = Frame::signed(&identity.sign, body)?;
    conn.write_line(&frame.to_line()?).await?;
    Ok(())
}

async fn respond(engine: Arc<Engine>, mut conn: BoxedConnection) {
    let identity = engine.identity();

    // ── AWAIT_HELLO: 5 s hard timeout from first byte ────────────────────
    let line = match timeout(engine.config.handshake_timeout, conn.read_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return,
        Ok(Err(err)) => {
            debug!(error = %err, "connection failed before hello");
            return;
        }
        Err(_) => {
            debug!("handshake timed out");
            return;
        }
    };

    let hello = match Frame::from_line(&line) {
        Ok(frame) => frame,
        Err(err) => {
            // No attributable sender key on an unparseable first frame.
            debug!(error = %err, "unparseable hello dropped");
            return;
        }
    };
    let peer_key = hello.from.clone();

    // A peer serving a block for invalid traffic gets nothing at all.
    if engine.rate.is_blocked(&peer_key, LimitClass::InvalidMessages) {
        debug!(peer = %peer_key, "peer blocked for invalid traffic");
        conn.close().await;
        return;
    }

    let FrameBody::Hello { versions, ephemeral_pub: _peer_hello_ephemeral } = hello.body.clone() else {
        charge_invalid(&engine, &peer_key, "first frame was not hello");
        return;
    };
    if hello.verify().is_err() {
        charge_invalid(&engine, &peer_key, "hello signature invalid");
        return;
    }

    if !engine.rate.check(&peer_key, LimitClass::Connections) {
        let _ = send(&identity, &mut conn, reject(REASON_RATE_LIMITED, None)).await;
        conn.close().await;
        return;
    }

    // ── Version negotiation ──────────────────────────────────────────────
    let version = versions
        .iter()
        .copied()
        .filter(|v| (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(v))
        .max();
    let Some(version) = version else {
        let _ = send(&identity, &mut conn, reject(REASON_NO_COMMON_VERSION, None)).await;
        conn.close().await;
        return;
    };

    // One ephemeral keypair per inbound connection; dies with this task.
    let my_ephemeral = (version >= 2).then(EphemeralKeyPair::generate);
    let ack = FrameBody::HelloAck {
        version,
        ephemeral_pub: my_ephemeral.as_ref().map(|e| e.public_hex().to_string()),
    };
    if let Err(err) = send(&identity, &mut conn, ack).await {
        debug!(error = %err, "hello-ack write failed");
        return;
    }

    // ── NEGOTIATED: exactly one typed request ────────────────────────────
    let line = match timeout(engine.config.request_timeout, conn.read_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return,
        Ok(Err(err)) => {
            debug!(error = %err, "connection failed awaiting request");
            return;
        }
        Err(_) => {
            debug!("request timed out");
            return;
        }
    };

    let frame = match Frame::from_line(&line) {
        Ok(frame) => frame,
        Err(_) => {
            charge_invalid(&engine, &peer_key, "unparseable request");
            return;
        }
    };

    // Key-rotation frames skip the outer signature and replay gates: the
    // outer frame is authorised by the rotation record inside, which is
    // signed by the key we still hold for this peer.
    if !matches!(frame.body, FrameBody::KeyRotation { .. }) {
        if frame.verify().is_err() {
            charge_invalid(&engine, &frame.from, "request signature invalid");
            return;
        }
        if !engine.replay.check(&frame.nonce, frame.ts) {
            charge_invalid(&engine, &frame.from, "replayed nonce");
            return;
        }
    }

    if let Some(reply) = dispatch(&engine, &identity, version, my_ephemeral.as_ref(), frame).await {
        if let Err(err) = send(&identity, &mut conn, reply).await {
            debug!(error = %err, "reply write failed");
        }
    }
    conn.close().await;
}

/// Route one verified request. `None` means silent drop (already charged).
async fn dispatch(
    engine: &Engine,
    identity: &Identity,
    version: u32,
    my_ephemeral: Option<&EphemeralKeyPair>,
    frame: Frame,
) -> Option<FrameBody> {
    let from = frame.from.clone();
    match frame.body {
        FrameBody::Claim { token, encrypt_pub } => {
            Some(handle_claim(engine, identity, &from, &token, &encrypt_pub))
        }
        FrameBody::Inject {
            session,
            payload,
            encrypt_pub,
            ephemeral_pub,
        } => {
            handle_inject(
                engine,
                identity,
                version,
                my_ephemeral,
                &from,
                session,
                &payload,
                encrypt_pub,
                ephemeral_pub,
            )
            .await
        }
        FrameBody::KeyRotation { key_rotation } => {
            if key_rotation.verify().is_err() {
                return Some(reject("invalid key rotation", None));
            }
            let grants = engine.access.process_key_rotation(&key_rotation);
            let peers = engine.peers.process_key_rotation(&key_rotation);
            match (grants, peers) {
                (Ok(a), Ok(b)) if a || b => Some(FrameBody::Ack {
                    session: None,
                    encrypt_pub: None,
                }),
                (Ok(_), Ok(_)) => Some(reject("invalid key rotation", None)),
                (a, b) => {
                    warn!(grants = ?a.err(), peers = ?b.err(), "rotation persistence failed");
                    Some(reject("invalid key rotation", None))
                }
            }
        }
        _ => {
            charge_invalid(engine, &from, "unexpected frame type for request");
            None
        }
    }
}

fn handle_claim(
    engine: &Engine,
    identity: &Identity,
    from: &str,
    token: &str,
    encrypt_pub: &str,
) -> FrameBody {
    if !engine.rate.check(from, LimitClass::Claims) {
        return reject(REASON_RATE_LIMITED, None);
    }
    let parsed = match InviteToken::decode(token) {
        Ok(parsed) => parsed,
        Err(_) => return reject("invalid token", None),
    };
    if parsed.verify_signature().is_err() {
        return reject("invalid token", None);
    }
    if parsed.iss != identity.sign.public_hex() {
        return reject("token not issued by this peer", None);
    }
    // Bearer binding: the token is useless to anyone but its subject.
    if parsed.sub != from {
        return reject("token not issued for you", None);
    }
    if parsed.is_expired(now_ms()) {
        return reject("token expired", None);
    }

    if let Err(err) =
        engine
            .access
            .grant_access(from, &parsed.ses, &parsed.cap, Some(encrypt_pub), None)
    {
        warn!(error = %err, "grant persistence failed");
        return reject("claim failed", None);
    }
    // Best-effort bookkeeping; the grant above is the real state change.
    if let Err(err) = engine.invites.mark_claimed(token, from) {
        debug!(error = %err, "invite record update failed");
    }
    info!(peer = %short_id(from).unwrap_or_else(|_| from.to_string()), "invite claimed");

    FrameBody::Ack {
        session: None,
        encrypt_pub: Some(identity.encrypt.public_hex().to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_inject(
    engine: &Engine,
    identity: &Identity,
    version: u32,
    my_ephemeral: Option<&EphemeralKeyPair>,
    from: &str,
    session: String,
    payload: &str,
    encrypt_pub: Option<String>,
    ephemeral_pub: Option<String>,
) -> Option<FrameBody> {
    if !engine.rate.check(from, LimitClass::Injects) {
        return Some(reject(REASON_RATE_LIMITED, Some(session)));
    }
    if !engine.access.is_authorized(from, &session) {
        return Some(reject("unauthorized", Some(session)));
    }

    // Forward-secrecy selection: ephemeral-ephemeral when v2 was negotiated
    // and both sides minted one, static ECDH otherwise.
    let plaintext = match (version >= 2, my_ephemeral, ephemeral_pub) {
        (true, Some(mine), Some(theirs)) => decrypt_with_ephemeral(payload, mine, &theirs),
        _ => {
            let peer_encrypt = engine
                .access
                .encrypt_pub_for_sender(from)
                .or(encrypt_pub);
            let Some(peer_encrypt) = peer_encrypt else {
                return Some(reject("missing encryption key", Some(session)));
            };
            decrypt_static(payload, &identity.encrypt, &peer_encrypt)
        }
    };
    let plaintext = match plaintext {
        Ok(plaintext) => plaintext,
        Err(_) => {
            charge_invalid(engine, from, "payload failed to decrypt");
            return None;
        }
    };
    let plaintext = match String::from_utf8(plaintext.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            charge_invalid(engine, from, "payload not utf-8");
            return None;
        }
    };

    match engine.handler.on_inject(&session, &plaintext, from).await {
        Ok(()) => Some(FrameBody::Ack {
            session: Some(session),
            encrypt_pub: None,
        }),
        Err(err) => {
            warn!(error = %err, session = %session, "inject handler failed");
            Some(FrameBody::Reject {
                reason: "inject failed".to_string(),
                session: Some(session),
            })
        }
    }
}
