//! wopr_proto — WOPR P2P wire protocol types
//!
//! Everything that crosses a signature boundary lives here: the canonical
//! signing encoding, the seven wire frame shapes, bearer-bound invite
//! tokens, and key-rotation records.
//!
//! # Module layout
//! - `canonical` — deterministic signing encoding (sorted keys, `sig` omitted)
//! - `frame`     — newline-delimited frames + protocol version constants
//! - `token`     — invite token mint / encode / parse
//! - `rotation`  — key-rotation records signed by the retiring key
//! - `error`     — unified error type

pub mod canonical;
pub mod error;
pub mod frame;
pub mod rotation;
pub mod token;

pub use error::ProtoError;
pub use frame::{Frame, FrameBody, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
pub use rotation::KeyRotation;
pub use token::InviteToken;

/// Milliseconds since the Unix epoch; the one clock the protocol uses.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
