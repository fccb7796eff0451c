//! Network identity primitives: node addresses and public-key rings.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Onion-style network address of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A party's public keys: the ed25519 signature key and the encryption key
/// used by the mailbox transport.
///
/// The private halves never enter this subsystem; signing happens in the
/// wallet and decryption in the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKeyRing {
    pub signature_pub_key: Vec<u8>,
    pub encryption_pub_key: Vec<u8>,
}

impl PubKeyRing {
    pub fn new(signature_pub_key: Vec<u8>, encryption_pub_key: Vec<u8>) -> Self {
        Self {
            signature_pub_key,
            encryption_pub_key,
        }
    }

    /// Hex encoding of the signature public key; the message that an
    /// arbitrator's registration key signs over.
    pub fn signature_pub_key_hex(&self) -> String {
        hex::encode(&self.signature_pub_key)
    }

    /// Stable integer id of this ring, used as the trader id in dispute
    /// identities. First four bytes (big endian) of SHA3-256 over both keys.
    pub fn trader_id(&self) -> i32 {
        let mut hasher = Sha3_256::new();
        hasher.update(&self.signature_pub_key);
        hasher.update(&self.encryption_pub_key);
        let digest = hasher.finalize();
        i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}
