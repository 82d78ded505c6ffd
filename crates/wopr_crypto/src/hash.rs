//! Identity digests.
//!
//! `short_id` — first 8 hex chars of SHA-256 over the raw signing public key;
//! the human-facing peer identifier.
//!
//! `topic_of` — the full 32-byte SHA-256 digest; the rendezvous topic a node
//! listens on. The transport treats it as an opaque identifier.

use sha2::{Digest, Sha256};

use crate::{error::CryptoError, identity::decode_key_hex};

pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(sign_pub_hex: &str) -> Result<String, CryptoError> {
    let digest = Sha256::digest(decode_key_hex(sign_pub_hex)?);
    Ok(hex::encode(digest)[..SHORT_ID_LEN].to_string())
}

pub fn topic_of(sign_pub_hex: &str) -> Result<[u8; 32], CryptoError> {
    let digest = Sha256::digest(decode_key_hex(sign_pub_hex)?);
    Ok(digest.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SigningKeyPair;

    #[test]
    fn short_id_is_prefix_of_topic() {
        let kp = SigningKeyPair::generate();
        let id = short_id(kp.public_hex()).unwrap();
        let topic = topic_of(kp.public_hex()).unwrap();
        assert_eq!(id.len(), 8);
        assert!(hex::encode(topic).starts_with(&id));
    }

    #[test]
    fn distinct_keys_distinct_topics() {
        let a = SigningKeyPair::generate();
        let b = SigningKeyPair::generate();
        assert_ne!(topic_of(a.public_hex()).unwrap(), topic_of(b.public_hex()).unwrap());
    }

    #[test]
    fn rejects_malformed_key() {
        assert!(short_id("not-hex").is_err());
        assert!(short_id("abcd").is_err());
    }
}
