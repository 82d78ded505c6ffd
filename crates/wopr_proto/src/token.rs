//! Invite tokens.
//!
//! An invite is a bearer-BOUND capability: the issuer signs the intended
//! recipient's public key into the token (`sub`), so possession alone grants
//! nothing. The claim responder enforces `sub == claimer`; this module only
//! validates structure, signature, and expiry.
//!
//! Wire form: `wopr-invite:` + URL-safe base64 (no padding) of the canonical
//! JSON including `sig`. The parser accepts the raw base64 too, and ignores
//! any leading label up to the last `:`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use wopr_crypto::identity::{verify, SigningKeyPair};

use crate::{canonical, error::ProtoError, frame::new_nonce, now_ms};

pub const TOKEN_LABEL: &str = "wopr-invite";

/// Default invite lifetime: 24 hours.
pub const DEFAULT_TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// The one capability the protocol currently grants.
pub const CAP_INJECT: &str = "inject";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteToken {
    /// Issuer signing public key (hex).
    pub iss: String,
    /// Intended recipient signing public key (hex). Always present; the
    /// token is worthless to anyone else.
    pub sub: String,
    /// Session-name patterns the subject may inject into ("*" = any).
    pub ses: Vec<String>,
    /// Capability strings, currently `["inject"]`.
    pub cap: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl InviteToken {
    pub fn mint(
        issuer: &SigningKeyPair,
        subject_sign_pub: &str,
        sessions: Vec<String>,
        caps: Vec<String>,
        ttl_ms: i64,
    ) -> Result<Self, ProtoError> {
        if subject_sign_pub.is_empty() {
            return Err(ProtoError::InvalidToken("subject is required".into()));
        }
        let iat = now_ms();
        let mut token = InviteToken {
            iss: issuer.public_hex().to_string(),
            sub: subject_sign_pub.to_string(),
            ses: sessions,
            cap: caps,
            iat,
            exp: iat + ttl_ms,
            nonce: new_nonce(),
            sig: None,
        };
        token.sig = Some(issuer.sign(&canonical::signing_bytes(&token)?));
        Ok(token)
    }

    /// The opaque string handed to the invitee out-of-band.
    pub fn encode(&self) -> Result<String, ProtoError> {
        let bytes = canonical::wire_bytes(self)?;
        Ok(format!("{TOKEN_LABEL}:{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Structural decode only; no signature or expiry checks. The claim
    /// responder uses this so it can emit precise rejections in order.
    pub fn decode(s: &str) -> Result<Self, ProtoError> {
        let b64 = s.rsplit(':').next().unwrap_or(s);
        let bytes = URL_SAFE_NO_PAD
            .decode(b64.trim())
            .map_err(|e| ProtoError::InvalidToken(e.to_string()))?;
        let token: InviteToken =
            serde_json::from_slice(&bytes).map_err(|e| ProtoError::InvalidToken(e.to_string()))?;
        if token.sub.is_empty() {
            return Err(ProtoError::InvalidToken("subject is required".into()));
        }
        Ok(token)
    }

    /// Verify `sig` under `iss`.
    pub fn verify_signature(&self) -> Result<(), ProtoError> {
        let sig = self.sig.as_ref().ok_or(ProtoError::MissingSignature)?;
        let bytes = canonical::signing_bytes(self)?;
        verify(&self.iss, &bytes, sig)
            .map_err(|_| ProtoError::InvalidToken("signature verification failed".into()))
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.exp <= now
    }

    /// Full client-side validation: decode, verify signature, check expiry.
    /// Deliberately does NOT check `sub` against the caller; that check
    /// belongs to the claim exchange so the issuer can reject precisely.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        let token = Self::decode(s)?;
        token.verify_signature()?;
        if token.is_expired(now_ms()) {
            return Err(ProtoError::TokenExpired);
        }
        Ok(token)
    }
}
