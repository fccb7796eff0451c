//! Network-published arbitrator identity records.
//!
//! One entity with a capability set replaces the historical pair of
//! near-identical Arbitrator and Mediator record types; the registry still
//! mirrors every accepted arbitrator into the mediator view for
//! compatibility with peers that query the two roles separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::models::keys::{NodeAddress, PubKeyRing};

/// Network lifetime of a published identity record; republished at half
/// this interval while the node is bootstrapped.
pub const IDENTITY_TTL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// Capability of a published dispute agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentRole {
    Arbitrator,
    Mediator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitratorIdentity {
    pub node_address: NodeAddress,
    pub pub_key_ring: PubKeyRing,
    pub language_codes: Vec<String>,
    pub registration_date: DateTime<Utc>,
    /// ed25519 public key from the operator allow-list.
    pub registration_pub_key: Vec<u8>,
    /// Signature by `registration_pub_key` over the hex encoding of the
    /// ring's signature public key.
    pub registration_signature: Vec<u8>,
    pub email_address: Option<String>,
    /// Forward-compatibility escape hatch; unknown fields survive a
    /// round-trip through peers running older versions.
    pub extra_data: Option<HashMap<String, String>>,
    pub roles: BTreeSet<AgentRole>,
}

impl ArbitratorIdentity {
    pub fn new(
        node_address: NodeAddress,
        pub_key_ring: PubKeyRing,
        language_codes: Vec<String>,
        registration_pub_key: Vec<u8>,
        registration_signature: Vec<u8>,
    ) -> Self {
        let mut roles = BTreeSet::new();
        roles.insert(AgentRole::Arbitrator);
        Self {
            node_address,
            pub_key_ring,
            language_codes,
            registration_date: Utc::now(),
            registration_pub_key,
            registration_signature,
            email_address: None,
            extra_data: None,
            roles,
        }
    }

    pub fn registration_pub_key_hex(&self) -> String {
        hex::encode(&self.registration_pub_key)
    }

    pub fn is_arbitrator(&self) -> bool {
        self.roles.contains(&AgentRole::Arbitrator)
    }

    pub fn is_mediator(&self) -> bool {
        self.roles.contains(&AgentRole::Mediator)
    }

    /// Grant a role in place (used by the registry's mediator mirroring).
    pub fn grant_role(&mut self, role: AgentRole) {
        self.roles.insert(role);
    }
}
