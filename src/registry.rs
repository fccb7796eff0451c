//! Trust registry for network-published arbitrator identities.
//!
//! Candidates pass two gates before entering the trusted map: their
//! registration public key must be on the configured allow-list, and their
//! registration signature over their own ring's signature key must verify.
//! Cryptographic failures exclude the candidate; they never escape past
//! the verification boundary.

use ed25519_dalek::{Signature, VerifyingKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ArbitratorKeyList, RepublishConfig};
use crate::error::DisputeError;
use crate::models::arbitrator::{AgentRole, ArbitratorIdentity};
use crate::models::keys::NodeAddress;
use crate::traits::{ArbitratorDirectory, MailboxTransport};

/// Invoked when a published identity is removed, so the caller can clear
/// any local user selection referencing it.
pub type SelectionCleanup = Box<dyn Fn(&NodeAddress) + Send + Sync>;

pub struct ArbitratorRegistry {
    key_list: ArbitratorKeyList,
    directory: Arc<dyn ArbitratorDirectory>,
    transport: Arc<dyn MailboxTransport>,
    trusted: RwLock<HashMap<NodeAddress, ArbitratorIdentity>>,
    selection_cleanup: Option<SelectionCleanup>,
}

impl ArbitratorRegistry {
    pub fn new(
        key_list: ArbitratorKeyList,
        directory: Arc<dyn ArbitratorDirectory>,
        transport: Arc<dyn MailboxTransport>,
    ) -> Self {
        Self {
            key_list,
            directory,
            transport,
            trusted: RwLock::new(HashMap::new()),
            selection_cleanup: None,
        }
    }

    /// Register a cleanup hook for removed identities.
    pub fn with_selection_cleanup(mut self, cleanup: SelectionCleanup) -> Self {
        self.selection_cleanup = Some(cleanup);
        self
    }

    /// Membership test against the configured allow-list.
    pub fn register(&self, registration_pub_key_hex: &str) -> bool {
        self.key_list.contains(registration_pub_key_hex)
    }

    /// Verify that `registration_signature` is a valid ed25519 signature by
    /// `registration_pub_key` over the hex encoding of `signature_pub_key`.
    /// Any cryptographic failure yields false.
    pub fn verify(
        &self,
        signature_pub_key: &[u8],
        registration_pub_key: &[u8],
        registration_signature: &[u8],
    ) -> bool {
        let key_bytes: [u8; 32] = match registration_pub_key.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let verifying_key = match VerifyingKey::from_bytes(&key_bytes) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let signature = match Signature::from_slice(registration_signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        let message = hex::encode(signature_pub_key);
        verifying_key
            .verify_strict(message.as_bytes(), &signature)
            .is_ok()
    }

    fn accepts(&self, identity: &ArbitratorIdentity) -> bool {
        if !self.register(&identity.registration_pub_key_hex()) {
            debug!(
                node = %identity.node_address,
                "arbitrator registration key not allow-listed"
            );
            return false;
        }
        if !self.verify(
            &identity.pub_key_ring.signature_pub_key,
            &identity.registration_pub_key,
            &identity.registration_signature,
        ) {
            warn!(
                node = %identity.node_address,
                "arbitrator registration signature invalid"
            );
            return false;
        }
        true
    }

    /// Recompute the trusted map from the directory's published records.
    /// Every accepted arbitrator is mirrored into the mediator view.
    pub async fn refresh(&self) {
        let published = self.directory.published_arbitrators().await;
        let mut accepted = HashMap::new();
        for mut identity in published {
            if self.accepts(&identity) {
                identity.grant_role(AgentRole::Mediator);
                accepted.insert(identity.node_address.clone(), identity);
            }
        }
        debug!(trusted = accepted.len(), "arbitrator map refreshed");
        *self.trusted.write().expect("trusted map lock poisoned") = accepted;
    }

    pub fn trusted_arbitrators(&self) -> Vec<ArbitratorIdentity> {
        self.trusted
            .read()
            .expect("trusted map lock poisoned")
            .values()
            .filter(|id| id.is_arbitrator())
            .cloned()
            .collect()
    }

    pub fn trusted_mediators(&self) -> Vec<ArbitratorIdentity> {
        self.trusted
            .read()
            .expect("trusted map lock poisoned")
            .values()
            .filter(|id| id.is_mediator())
            .cloned()
            .collect()
    }

    pub fn is_trusted(&self, node_address: &NodeAddress) -> bool {
        self.trusted
            .read()
            .expect("trusted map lock poisoned")
            .contains_key(node_address)
    }

    /// Remove a published identity and clean up any local selection
    /// referencing it.
    pub async fn revoke(&self, identity: &ArbitratorIdentity) -> Result<(), DisputeError> {
        self.directory.remove(identity).await?;
        self.trusted
            .write()
            .expect("trusted map lock poisoned")
            .remove(&identity.node_address);
        if let Some(cleanup) = &self.selection_cleanup {
            cleanup(&identity.node_address);
        }
        Ok(())
    }

    /// Keep the locally operated arbitrator identity published: one publish
    /// shortly after startup, a one-time repeat soon after, then a steady
    /// republish at half the record TTL. A failed publish is retried on a
    /// short fixed interval until it succeeds.
    pub fn start_republish(
        self: Arc<Self>,
        identity: ArbitratorIdentity,
        config: RepublishConfig,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(config.startup_delay).await;
            self.publish_with_retry(&identity, &config).await;

            tokio::time::sleep(config.startup_repeat_delay).await;
            self.publish_with_retry(&identity, &config).await;

            loop {
                tokio::time::sleep(config.republish_interval()).await;
                self.publish_with_retry(&identity, &config).await;
            }
        })
    }

    async fn publish_with_retry(&self, identity: &ArbitratorIdentity, config: &RepublishConfig) {
        loop {
            if !self.transport.is_bootstrapped() {
                tokio::time::sleep(config.retry_interval).await;
                continue;
            }
            match self.directory.publish(identity.clone()).await {
                Ok(()) => {
                    info!(node = %identity.node_address, "arbitrator identity published");
                    return;
                }
                Err(e) => {
                    warn!(
                        node = %identity.node_address,
                        error = %e,
                        "arbitrator publish failed, retrying"
                    );
                    tokio::time::sleep(config.retry_interval).await;
                }
            }
        }
    }
}
