//! Allow-list of arbitrator registration keys.
//!
//! An arbitrator identity is only trusted if its registration public key is
//! a member of this list and its self-signature verifies. Production nodes
//! ship the fixed list below; development nodes are constructed with a
//! single override key instead.

use std::collections::HashSet;

/// Registration public keys (ed25519, hex) authorized to operate
/// arbitrators on the production network.
const TRUSTED_REGISTRATION_KEYS: &[&str] = &[
    "6d9f273c120a92445d0b2fd7e9f3cf33c547558c63d6dbb2f3c2c67005ce4b6e",
    "a1f0b9d4f7e8b2c1903fb4a86d5e12c7d80a44be913c6f2aa05d7be43a19c0dd",
    "0e72c3a6be5f9d84417a2c60cf1bb3969ad44c11e07f58d2360b8a9e5f0d1c22",
    "c44810aefb29371d6f0e8d5b2a9c71e45508d3b6941fa0c2e7b6d5843f1a9e07",
    "58b2e09c7d41f3a6850cb1d4e6f92378a90d12ce5b47f8016e3a2d9c0b5f7e84",
];

/// Membership test for arbitrator registration keys.
#[derive(Debug, Clone)]
pub struct ArbitratorKeyList {
    keys: HashSet<String>,
    dev_override: Option<String>,
}

impl ArbitratorKeyList {
    /// The fixed production allow-list.
    pub fn production() -> Self {
        Self {
            keys: TRUSTED_REGISTRATION_KEYS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            dev_override: None,
        }
    }

    /// A development list accepting exactly one override key.
    pub fn development(dev_key_hex: impl Into<String>) -> Self {
        Self {
            keys: HashSet::new(),
            dev_override: Some(dev_key_hex.into().to_lowercase()),
        }
    }

    /// Whether the given registration public key (hex) is allow-listed.
    pub fn contains(&self, pub_key_hex: &str) -> bool {
        let normalized = pub_key_hex.to_lowercase();
        if let Some(dev_key) = &self.dev_override {
            return *dev_key == normalized;
        }
        self.keys.contains(&normalized)
    }
}
