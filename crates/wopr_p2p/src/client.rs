//! Initiator side of the protocol.
//!
//! Each operation opens one connection, runs the hello exchange, sends
//! exactly one typed request, and closes on the reply — requests are never
//! multiplexed, so ephemeral keys are scoped to a single payload exchange.
//!
//! Nothing here returns an error across the component boundary: every
//! failure collapses into an [`Outcome`].

use tokio::time::timeout;
use tracing::{debug, warn};

use wopr_crypto::ecdh::{encrypt_static, encrypt_with_ephemeral, EphemeralKeyPair};
use wopr_crypto::hash::topic_of;
use wopr_proto::frame::{supported_versions, Frame, FrameBody};
use wopr_proto::rotation::KeyRotation;
use wopr_proto::token::InviteToken;
use wopr_proto::ProtoError;
use wopr_store::Identity;

use crate::engine::Engine;
use crate::error::Outcome;
use crate::transport::{BoxedConnection, Connection as _, Role, Topic};

/// An open connection after a successful hello exchange.
struct Negotiated {
    conn: BoxedConnection,
    version: u32,
    my_ephemeral: EphemeralKeyPair,
    peer_ephemeral: Option<String>,
}

impl Engine {
    /// Deliver `message` into `session` on a known peer.
    pub async fn inject(&self, peer_ref: &str, session: &str, message: &str) -> Outcome {
        let identity = self.identity();
        let Some(peer) = self.peers.get(peer_ref) else {
            return Outcome::Invalid(format!("unknown peer: {peer_ref}"));
        };
        let Some(peer_encrypt) = peer.encrypt_pub.clone() else {
            return Outcome::Invalid(format!("peer {} has no encryption key", peer.id));
        };
        // Advisory local check: a session the peer never granted fails fast,
        // before any connection is opened.
        if !peer.sessions.iter().any(|s| s == "*" || s == session) {
            return Outcome::Rejected(format!("session not permitted: {session}"));
        }
        let topic = match topic_of(&peer.public_key) {
            Ok(topic) => topic,
            Err(err) => return Outcome::Invalid(err.to_string()),
        };

        let mut chan = match self.open(topic, &peer.public_key, &identity).await {
            Ok(chan) => chan,
            Err(outcome) => return outcome,
        };

        // Forward-secrecy selection mirrors the responder's.
        let sealed = match &chan.peer_ephemeral {
            Some(peer_eph) if chan.version >= 2 => {
                encrypt_with_ephemeral(message.as_bytes(), &chan.my_ephemeral, peer_eph).map(|payload| {
                    FrameBody::Inject {
                        session: session.to_string(),
                        payload,
                        encrypt_pub: None,
                        ephemeral_pub: Some(chan.my_ephemeral.public_hex().to_string()),
                    }
                })
            }
            _ => encrypt_static(message.as_bytes(), &identity.encrypt, &peer_encrypt).map(|payload| {
                FrameBody::Inject {
                    session: session.to_string(),
                    payload,
                    encrypt_pub: Some(identity.encrypt.public_hex().to_string()),
                    ephemeral_pub: None,
                }
            }),
        };
        let body = match sealed {
            Ok(body) => body,
            Err(err) => return Outcome::Invalid(err.to_string()),
        };

        let outcome = match self.request(&identity, &mut chan.conn, &peer.public_key, body).await {
            Ok(_) => Outcome::Ok,
            Err(outcome) => outcome,
        };
        chan.conn.close().await;
        outcome
    }

    /// Claim an invite token received out-of-band, recording the issuer as
    /// an outbound peer on success.
    ///
    /// Note the mis-addressed case (`sub` is someone else) is deliberately
    /// left to the issuer, so its precise rejection is what surfaces.
    pub async fn claim_invite(&self, token_str: &str) -> Outcome {
        let identity = self.identity();
        let token = match InviteToken::parse(token_str) {
            Ok(token) => token,
            Err(ProtoError::TokenExpired) => return Outcome::Invalid("token expired".to_string()),
            Err(err) => return Outcome::Invalid(err.to_string()),
        };
        let topic = match topic_of(&token.iss) {
            Ok(topic) => topic,
            Err(err) => return Outcome::Invalid(err.to_string()),
        };

        let mut chan = match self.open(topic, &token.iss, &identity).await {
            Ok(chan) => chan,
            Err(outcome) => return outcome,
        };
        let body = FrameBody::Claim {
            token: token_str.trim().to_string(),
            encrypt_pub: identity.encrypt.public_hex().to_string(),
        };
        let outcome = match self.request(&identity, &mut chan.conn, &token.iss, body).await {
            Ok(FrameBody::Ack { encrypt_pub, .. }) => {
                match self
                    .peers
                    .add(&token.iss, encrypt_pub.as_deref(), &token.ses, &token.cap, None)
                {
                    Ok(_) => Outcome::Ok,
                    Err(err) => Outcome::Invalid(err.to_string()),
                }
            }
            Ok(_) => Outcome::Offline,
            Err(outcome) => outcome,
        };
        chan.conn.close().await;
        outcome
    }

    /// Notify one counterparty, addressed by signing key, of a key rotation.
    pub async fn send_rotation(&self, peer_sign_pub: &str, rotation: &KeyRotation) -> Outcome {
        let identity = self.identity();
        let topic = match topic_of(peer_sign_pub) {
            Ok(topic) => topic,
            Err(err) => return Outcome::Invalid(err.to_string()),
        };
        let mut chan = match self.open(topic, peer_sign_pub, &identity).await {
            Ok(chan) => chan,
            Err(outcome) => return outcome,
        };
        let body = FrameBody::KeyRotation {
            key_rotation: rotation.clone(),
        };
        let outcome = match self.request(&identity, &mut chan.conn, peer_sign_pub, body).await {
            Ok(_) => Outcome::Ok,
            Err(outcome) => outcome,
        };
        chan.conn.close().await;
        outcome
    }

    /// Notify every known counterparty of a key rotation: outbound peers
    /// AND holders of grants we issued (they know us only by our old key).
    pub async fn broadcast_rotation(&self, rotation: &KeyRotation) -> Vec<(String, Outcome)> {
        let mut keys: Vec<String> = self.peers.list().into_iter().map(|p| p.public_key).collect();
        for grant in self.access.list() {
            if !grant.revoked && !keys.contains(&grant.peer_key) {
                keys.push(grant.peer_key);
            }
        }
        let mut results = Vec::new();
        for key in keys {
            let outcome = self.send_rotation(&key, rotation).await;
            if !outcome.is_ok() {
                warn!(peer = %key, outcome = ?outcome, "rotation broadcast failed");
            }
            results.push((key, outcome));
        }
        results
    }

    /// Dial `topic` and run the hello exchange against `expected_from`.
    async fn open(
        &self,
        topic: Topic,
        expected_from: &str,
        identity: &Identity,
    ) -> Result<Negotiated, Outcome> {
        let mut connections = match self.transport.join(topic, Role::Client).await {
            Ok(rx) => rx,
            Err(err) => {
                debug!(error = %err, "dial failed");
                return Err(Outcome::Offline);
            }
        };
        let mut conn = match timeout(self.config.request_timeout, connections.recv()).await {
            Ok(Some(conn)) => conn,
            _ => return Err(Outcome::Offline),
        };

        let my_ephemeral = EphemeralKeyPair::generate();
        let hello = FrameBody::Hello {
            versions: supported_versions(),
            ephemeral_pub: Some(my_ephemeral.public_hex().to_string()),
        };
        if write_frame(identity, &mut conn, hello).await.is_err() {
            return Err(Outcome::Offline);
        }

        let reply = match read_frame(&mut conn, self.config.handshake_timeout).await {
            Some(reply) => reply,
            None => return Err(Outcome::Offline),
        };
        if reply.verify().is_err() || reply.from != expected_from {
            warn!("hello-ack failed verification");
            return Err(Outcome::Offline);
        }
        match reply.body {
            FrameBody::HelloAck { version, ephemeral_pub } => Ok(Negotiated {
                conn,
                version,
                my_ephemeral,
                peer_ephemeral: ephemeral_pub,
            }),
            FrameBody::Reject { reason, .. } => Err(Outcome::from_reject_reason(&reason)),
            _ => Err(Outcome::Offline),
        }
    }

    /// Send one signed request and classify the single reply.
    async fn request(
        &self,
        identity: &Identity,
        conn: &mut BoxedConnection,
        expected_from: &str,
        body: FrameBody,
    ) -> Result<FrameBody, Outcome> {
        if write_frame(identity, conn, body).await.is_err() {
            return Err(Outcome::Offline);
        }
        let reply = match read_frame(conn, self.config.request_timeout).await {
            Some(reply) => reply,
            None => return Err(Outcome::Offline),
        };
        if reply.verify().is_err() || reply.from != expected_from {
            warn!("response failed verification");
            return Err(Outcome::Offline);
        }
        match reply.body {
            FrameBody::Ack { .. } => Ok(reply.body),
            FrameBody::Reject { reason, .. } => Err(Outcome::from_reject_reason(&reason)),
            _ => Err(Outcome::Offline),
        }
    }
}

async fn write_frame(
    identity: &Identity,
    conn: &mut BoxedConnection,
    body: FrameBody,
) -> Result<(), ()> {
    let frame = Frame::signed(&identity.sign, body).map_err(|_| ())?;
    let line = frame.to_line().map_err(|_| ())?;
    conn.write_line(&line).await.map_err(|err| {
        debug!(error = %err, "frame write failed");
    })
}

async fn read_frame(conn: &mut BoxedConnection, limit: std::time::Duration) -> Option<Frame> {
    let line = match timeout(limit, conn.read_line()).await {
        Ok(Ok(Some(line))) => line,
        _ => return None,
    };
    Frame::from_line(&line).ok()
}
