use thiserror::Error;

use wopr_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame is not signed")]
    MissingSignature,

    #[error("Invalid invite token: {0}")]
    InvalidToken(String),

    #[error("Invite token expired")]
    TokenExpired,

    #[error("Invalid key rotation: {0}")]
    InvalidRotation(String),
}
