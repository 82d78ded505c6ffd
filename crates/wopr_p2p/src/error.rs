//! Engine errors and the caller-facing outcome taxonomy.
//!
//! The engine never lets an error escape the component boundary: every send
//! path collapses into an `Outcome`, and responder-side failures become
//! either a `reject` frame or a silent drop.

use thiserror::Error;

use wopr_crypto::CryptoError;
use wopr_proto::ProtoError;
use wopr_store::StoreError;

/// Internal error type; collapsed to an `Outcome` at the public seam.
#[derive(Debug, Error)]
pub enum P2pError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out")]
    Timeout,

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result classification for every initiator operation. Doubles as the
/// process exit code at the CLI boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Success.
    Ok,
    /// Peer unreachable or timed out.
    Offline,
    /// Authorisation refused by the peer or locally.
    Rejected(String),
    /// Malformed input, unknown peer, missing key.
    Invalid(String),
    /// Peer refused for a rate-limit violation.
    RateLimited,
    /// No common protocol version.
    VersionMismatch,
}

pub const REASON_RATE_LIMITED: &str = "rate limited";
pub const REASON_NO_COMMON_VERSION: &str = "no common protocol version";

impl Outcome {
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Ok => 0,
            Outcome::Offline => 1,
            Outcome::Rejected(_) => 2,
            Outcome::Invalid(_) => 3,
            Outcome::RateLimited => 4,
            Outcome::VersionMismatch => 5,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    /// Classify a peer's `reject` reason the way the peer meant it.
    pub fn from_reject_reason(reason: &str) -> Self {
        match reason {
            REASON_RATE_LIMITED => Outcome::RateLimited,
            REASON_NO_COMMON_VERSION => Outcome::VersionMismatch,
            other => Outcome::Rejected(other.to_string()),
        }
    }
}
