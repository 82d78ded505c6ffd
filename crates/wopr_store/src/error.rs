use thiserror::Error;

use wopr_crypto::CryptoError;
use wopr_proto::ProtoError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Identity already initialised (use force to replace)")]
    AlreadyInitialized,

    #[error("No identity initialised")]
    NotInitialized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store file corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}
