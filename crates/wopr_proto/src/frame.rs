//! Wire frames.
//!
//! A frame is one newline-terminated line of canonical JSON. Common fields:
//! `v` (protocol version), `type`, `from` (signer public key, hex), `nonce`
//! (16 random bytes, hex), `ts` (ms since epoch), `sig` (Ed25519 over the
//! canonical encoding with `sig` omitted), plus the type-specific fields of
//! the seven shapes below.
//!
//! Version 2 adds ephemeral-ECDH payloads (forward secrecy); version 1 falls
//! back to static-key ECDH on the peers' long-term encryption keys.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use wopr_crypto::identity::{verify, SigningKeyPair};

use crate::{canonical, error::ProtoError, now_ms, rotation::KeyRotation};

pub const PROTOCOL_VERSION: u32 = 2;
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// The versions this node is willing to speak, newest last.
pub fn supported_versions() -> Vec<u32> {
    (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).collect()
}

/// 16 random bytes, hex-encoded. Fresh per frame; the replay gate keys on it.
pub fn new_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub v: u32,
    pub from: String,
    pub nonce: String,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    #[serde(flatten)]
    pub body: FrameBody,
}

/// The seven concrete frame shapes, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameBody {
    #[serde(rename = "hello")]
    Hello {
        versions: Vec<u32>,
        #[serde(rename = "ephemeralPub", skip_serializing_if = "Option::is_none")]
        ephemeral_pub: Option<String>,
    },
    #[serde(rename = "hello-ack")]
    HelloAck {
        version: u32,
        #[serde(rename = "ephemeralPub", skip_serializing_if = "Option::is_none")]
        ephemeral_pub: Option<String>,
    },
    #[serde(rename = "claim")]
    Claim {
        token: String,
        #[serde(rename = "encryptPub")]
        encrypt_pub: String,
    },
    #[serde(rename = "inject")]
    Inject {
        session: String,
        payload: String,
        #[serde(rename = "encryptPub", skip_serializing_if = "Option::is_none")]
        encrypt_pub: Option<String>,
        #[serde(rename = "ephemeralPub", skip_serializing_if = "Option::is_none")]
        ephemeral_pub: Option<String>,
    },
    #[serde(rename = "key-rotation")]
    KeyRotation {
        #[serde(rename = "keyRotation")]
        key_rotation: KeyRotation,
    },
    #[serde(rename = "ack")]
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
        #[serde(rename = "encryptPub", skip_serializing_if = "Option::is_none")]
        encrypt_pub: Option<String>,
    },
    #[serde(rename = "reject")]
    Reject {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
}

impl FrameBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            FrameBody::Hello { .. } => "hello",
            FrameBody::HelloAck { .. } => "hello-ack",
            FrameBody::Claim { .. } => "claim",
            FrameBody::Inject { .. } => "inject",
            FrameBody::KeyRotation { .. } => "key-rotation",
            FrameBody::Ack { .. } => "ack",
            FrameBody::Reject { .. } => "reject",
        }
    }
}

impl Frame {
    /// Build and sign a frame in one step. `from` is taken from the keypair.
    pub fn signed(keypair: &SigningKeyPair, body: FrameBody) -> Result<Self, ProtoError> {
        let mut frame = Frame {
            v: PROTOCOL_VERSION,
            from: keypair.public_hex().to_string(),
            nonce: new_nonce(),
            ts: now_ms(),
            sig: None,
            body,
        };
        frame.sig = Some(keypair.sign(&canonical::signing_bytes(&frame)?));
        Ok(frame)
    }

    /// Verify `sig` against `from` over the canonical encoding.
    pub fn verify(&self) -> Result<(), ProtoError> {
        let sig = self.sig.as_ref().ok_or(ProtoError::MissingSignature)?;
        let bytes = canonical::signing_bytes(self)?;
        verify(&self.from, &bytes, sig)?;
        Ok(())
    }

    /// The canonical wire line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, ProtoError> {
        let bytes = canonical::wire_bytes(self)?;
        String::from_utf8(bytes).map_err(|e| ProtoError::InvalidFrame(e.to_string()))
    }

    pub fn from_line(line: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(line.trim_end()).map_err(|e| ProtoError::InvalidFrame(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> SigningKeyPair {
        SigningKeyPair::generate()
    }

    #[test]
    fn signed_frame_verifies() {
        let kp = keypair();
        let frame = Frame::signed(
            &kp,
            FrameBody::Hello {
                versions: supported_versions(),
                ephemeral_pub: Some("ab".repeat(32)),
            },
        )
        .unwrap();
        frame.verify().unwrap();
    }

    #[test]
    fn tampered_frame_fails_verification() {
        let kp = keypair();
        let mut frame = Frame::signed(
            &kp,
            FrameBody::Inject {
                session: "dev".into(),
                payload: "blob".into(),
                encrypt_pub: None,
                ephemeral_pub: None,
            },
        )
        .unwrap();
        frame.body = FrameBody::Inject {
            session: "prod".into(),
            payload: "blob".into(),
            encrypt_pub: None,
            ephemeral_pub: None,
        };
        assert!(frame.verify().is_err());
    }

    #[test]
    fn unsigned_frame_fails_verification() {
        let kp = keypair();
        let mut frame = Frame::signed(&kp, FrameBody::Ack { session: None, encrypt_pub: None }).unwrap();
        frame.sig = None;
        assert!(matches!(frame.verify(), Err(ProtoError::MissingSignature)));
    }

    #[test]
    fn line_roundtrip_is_byte_identical() {
        let kp = keypair();
        let frame = Frame::signed(
            &kp,
            FrameBody::Reject {
                reason: "unauthorized".into(),
                session: Some("dev".into()),
            },
        )
        .unwrap();
        let line = frame.to_line().unwrap();
        let reparsed = Frame::from_line(&line).unwrap();
        assert_eq!(reparsed.to_line().unwrap(), line);
        assert_eq!(reparsed, frame);
        reparsed.verify().unwrap();
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Frame::from_line(r#"{"v":2,"type":"warp","from":"00","nonce":"00","ts":0}"#).is_err());
    }

    #[test]
    fn nonces_are_unique() {
        assert_ne!(new_nonce(), new_nonce());
        assert_eq!(new_nonce().len(), 32);
    }
}
