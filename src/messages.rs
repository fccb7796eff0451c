//! Wire messages exchanged over the encrypted mailbox transport.
//!
//! A closed sum type over the five dispute message kinds; the engine
//! matches it exhaustively, so adding a kind is a compile-time event for
//! every handler. Each variant carries a unique message id used for
//! deduplication and redelivery bookkeeping.

use serde::{Deserialize, Serialize};

use crate::models::chat::ChatMessage;
use crate::models::dispute::Dispute;
use crate::models::dispute_result::DisputeResult;
use crate::models::keys::NodeAddress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeMessage {
    /// Trader -> arbitrator: open a new dispute.
    OpenNewDispute {
        dispute: Dispute,
        sender_node_address: NodeAddress,
        uid: String,
    },
    /// Arbitrator -> counterparty: your peer opened a dispute, here is your
    /// mirrored record.
    PeerOpenedDispute {
        dispute: Dispute,
        sender_node_address: NodeAddress,
        uid: String,
    },
    /// Trader <-> arbitrator conversation entry. Trader-to-trader routing
    /// is not a legal use of this variant.
    Chat(ChatMessage),
    /// Arbitrator -> trader: the binding ruling.
    DisputeResult {
        dispute_result: DisputeResult,
        sender_node_address: NodeAddress,
        uid: String,
    },
    /// Publisher -> peer: the payout transaction has been broadcast, import
    /// it instead of signing your own.
    PeerPublishedPayoutTx {
        transaction: Vec<u8>,
        trade_id: String,
        sender_node_address: NodeAddress,
        uid: String,
    },
}

impl DisputeMessage {
    /// Unique message id used for dedup/redelivery bookkeeping.
    pub fn uid(&self) -> &str {
        match self {
            DisputeMessage::OpenNewDispute { uid, .. } => uid,
            DisputeMessage::PeerOpenedDispute { uid, .. } => uid,
            DisputeMessage::Chat(msg) => &msg.uid,
            DisputeMessage::DisputeResult { uid, .. } => uid,
            DisputeMessage::PeerPublishedPayoutTx { uid, .. } => uid,
        }
    }

    /// The trade this message belongs to.
    pub fn trade_id(&self) -> &str {
        match self {
            DisputeMessage::OpenNewDispute { dispute, .. } => dispute.trade_id(),
            DisputeMessage::PeerOpenedDispute { dispute, .. } => dispute.trade_id(),
            DisputeMessage::Chat(msg) => &msg.trade_id,
            DisputeMessage::DisputeResult { dispute_result, .. } => &dispute_result.trade_id,
            DisputeMessage::PeerPublishedPayoutTx { trade_id, .. } => trade_id,
        }
    }

    /// Short kind tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DisputeMessage::OpenNewDispute { .. } => "open_new_dispute",
            DisputeMessage::PeerOpenedDispute { .. } => "peer_opened_dispute",
            DisputeMessage::Chat(_) => "chat",
            DisputeMessage::DisputeResult { .. } => "dispute_result",
            DisputeMessage::PeerPublishedPayoutTx { .. } => "peer_published_payout_tx",
        }
    }
}
