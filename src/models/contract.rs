//! Immutable snapshot of the agreed trade terms.
//!
//! The contract is produced by the trade protocol (out of scope here) and
//! copied into every dispute so the arbitrator can rule without access to
//! either trader's live state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::models::keys::{NodeAddress, PubKeyRing};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub trade_id: String,
    /// Escrowed trade amount in atomic units.
    pub trade_amount: u64,
    pub buyer_node_address: NodeAddress,
    pub seller_node_address: NodeAddress,
    pub arbitrator_node_address: NodeAddress,
    pub buyer_pub_key_ring: PubKeyRing,
    pub seller_pub_key_ring: PubKeyRing,
    pub buyer_payout_address: String,
    pub seller_payout_address: String,
    pub buyer_multisig_pub_key: Vec<u8>,
    pub seller_multisig_pub_key: Vec<u8>,
}

impl Contract {
    /// Canonical JSON form, as exchanged and signed by both traders.
    pub fn as_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize contract")
    }

    /// SHA3-256 over the canonical JSON form.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let json = self.as_json()?;
        let mut hasher = Sha3_256::new();
        hasher.update(json.as_bytes());
        Ok(hasher.finalize().to_vec())
    }

    /// The key ring of the buyer or seller side.
    pub fn ring_of(&self, buyer: bool) -> &PubKeyRing {
        if buyer {
            &self.buyer_pub_key_ring
        } else {
            &self.seller_pub_key_ring
        }
    }

    /// The node address of the buyer or seller side.
    pub fn address_of(&self, buyer: bool) -> &NodeAddress {
        if buyer {
            &self.buyer_node_address
        } else {
            &self.seller_node_address
        }
    }

    /// The node address belonging to the trader with the given ring.
    /// Falls back to the seller address when the ring is unknown.
    pub fn address_of_ring(&self, ring: &PubKeyRing) -> &NodeAddress {
        if *ring == self.buyer_pub_key_ring {
            &self.buyer_node_address
        } else {
            &self.seller_node_address
        }
    }

    /// Whether the given ring is the buyer's.
    pub fn is_buyer(&self, ring: &PubKeyRing) -> bool {
        *ring == self.buyer_pub_key_ring
    }
}
