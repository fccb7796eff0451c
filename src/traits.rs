//! Collaborator traits at the subsystem boundary.
//!
//! The encrypted transport, the signing wallet, the trade manager, the
//! durable store and the identity directory all live outside this crate.
//! The engine, coordinator and registry only ever talk to these traits;
//! tests plug in-memory doubles into the same seams.

use async_trait::async_trait;

use crate::error::DisputeError;
use crate::messages::DisputeMessage;
use crate::models::arbitrator::ArbitratorIdentity;
use crate::models::dispute::Dispute;
use crate::models::keys::{NodeAddress, PubKeyRing};

/// Outcome of a mailbox send: the recipient either took delivery directly
/// or the message was parked in their mailbox for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReceipt {
    Arrived,
    StoredInMailbox,
}

/// Store-and-forward encrypted transport. Delivery is at-least-once and
/// unordered; sends are fire-and-forget from the engine's perspective.
#[async_trait]
pub trait MailboxTransport: Send + Sync {
    async fn send_encrypted(
        &self,
        recipient: NodeAddress,
        recipient_pub_key_ring: PubKeyRing,
        message: DisputeMessage,
    ) -> Result<DeliveryReceipt, DisputeError>;

    /// Whether the local node has finished bootstrapping into the network.
    fn is_bootstrapped(&self) -> bool;

    /// The local node's own published address.
    fn own_address(&self) -> NodeAddress;

    /// Remove an applied message from the remote mailbox.
    async fn remove_from_mailbox(&self, uid: &str);
}

/// A finalized transaction as produced or imported by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_id: String,
    pub raw: Vec<u8>,
}

/// Everything the wallet needs to co-sign and finalize a disputed payout.
#[derive(Debug, Clone)]
pub struct PayoutSignRequest {
    pub trade_id: String,
    pub deposit_tx: Vec<u8>,
    pub arbitrator_signature: Vec<u8>,
    pub arbitrator_pub_key: Vec<u8>,
    pub buyer_payout_amount: u64,
    pub seller_payout_amount: u64,
    pub buyer_payout_address: String,
    pub seller_payout_address: String,
    /// The local party's own multisig key; the wallet holds the private
    /// half and contributes the second signature.
    pub own_multisig_pub_key: Vec<u8>,
    pub buyer_multisig_pub_key: Vec<u8>,
    pub seller_multisig_pub_key: Vec<u8>,
}

/// Signing oracle: key management and transaction construction live in the
/// wallet, this subsystem only describes what to sign.
#[async_trait]
pub trait SigningWallet: Send + Sync {
    async fn co_sign_and_finalize_payout(
        &self,
        request: PayoutSignRequest,
    ) -> Result<SignedTransaction, DisputeError>;

    /// Import a serialized transaction received from the peer.
    fn import_transaction(&self, raw: &[u8]) -> Result<SignedTransaction, DisputeError>;

    /// Broadcast a finalized transaction; resolves with the tx id on
    /// network acceptance.
    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, DisputeError>;
}

/// Trade lifecycle collaborator, upstream owner of trades and offers.
#[async_trait]
pub trait TradeLifecycle: Send + Sync {
    async fn close_disputed_trade(&self, trade_id: &str);

    async fn mark_dispute_started_by_peer(&self, trade_id: &str);

    /// A payout transaction already known for this trade (open or closed),
    /// e.g. from normal trade completion racing the dispute.
    async fn payout_tx_for(&self, trade_id: &str) -> Option<SignedTransaction>;

    async fn has_open_trade(&self, trade_id: &str) -> bool;

    /// Close a still-open offer with the given id; false if none exists.
    async fn close_open_offer(&self, offer_id: &str) -> bool;
}

/// Durable storage for dispute records: loaded in full at startup, written
/// behind on every mutation, never deleted from.
pub trait DisputePersistence: Send + Sync {
    fn load(&self) -> Result<Vec<Dispute>, DisputeError>;

    /// Queue a full snapshot for asynchronous durable write.
    fn queue_write(&self, disputes: Vec<Dispute>);
}

/// The network's published-identity directory.
#[async_trait]
pub trait ArbitratorDirectory: Send + Sync {
    /// All currently published arbitrator identities, unfiltered.
    async fn published_arbitrators(&self) -> Vec<ArbitratorIdentity>;

    async fn publish(&self, identity: ArbitratorIdentity) -> Result<(), DisputeError>;

    async fn remove(&self, identity: &ArbitratorIdentity) -> Result<(), DisputeError>;
}
