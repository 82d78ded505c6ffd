//! wopr_p2p — WOPR peer-to-peer trust and injection engine
//!
//! Sits between an opaque transport (bidirectional line streams keyed by a
//! 32-byte topic) and the identity/trust stores. Inbound frames are parsed,
//! gated by the rate/replay layer, routed by type, and — if authorised —
//! delivered as decrypted plaintext to the external [`InjectHandler`].
//! Outbound requests are built from identity + trust state, signed, sealed,
//! and classified into an [`Outcome`] on completion.
//!
//! # Module layout
//! - `engine`    — shared per-node state, handler trait, housekeeping
//! - `listener`  — responder: hello → hello-ack → one request → ack/reject
//! - `client`    — initiator: inject / claim / key-rotation send paths
//! - `ratelimit` — per-peer sliding-window limits with block backoff
//! - `replay`    — bounded nonce set with timestamp skew bounds
//! - `transport` — the transport seam + in-memory test implementation
//! - `error`     — engine errors and the outcome taxonomy

pub mod client;
pub mod engine;
pub mod error;
pub mod listener;
pub mod ratelimit;
pub mod replay;
pub mod transport;

pub use engine::{Engine, EngineConfig, InjectHandler};
pub use error::{Outcome, P2pError};
pub use listener::ListenerHandle;
pub use ratelimit::{LimitClass, RateLimitConfig, RateLimiter};
pub use replay::ReplayProtector;
pub use transport::{Connection, Role, Transport};
