//! Conversation entries attached to a dispute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::keys::NodeAddress;

/// A file attached to a chat message (screenshots, bank statements).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// One entry in a dispute conversation: a trader or arbitrator chat message
/// or a generated system message.
///
/// `arrived` and `stored_in_mailbox` are delivery bookkeeping updated from
/// transport acknowledgements; they are excluded from equality so that a
/// redelivered copy with different flags still deduplicates against the
/// stored one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub trade_id: String,
    /// Integer hash of the sending trader's key ring.
    pub trader_id: i32,
    pub sender_is_trader: bool,
    pub message: String,
    pub attachments: Vec<Attachment>,
    pub sender_node_address: NodeAddress,
    pub date: DateTime<Utc>,
    pub arrived: bool,
    pub stored_in_mailbox: bool,
    pub is_system_message: bool,
    pub uid: String,
}

impl ChatMessage {
    pub fn new(
        trade_id: impl Into<String>,
        trader_id: i32,
        sender_is_trader: bool,
        message: impl Into<String>,
        attachments: Vec<Attachment>,
        sender_node_address: NodeAddress,
    ) -> Self {
        Self {
            trade_id: trade_id.into(),
            trader_id,
            sender_is_trader,
            message: message.into(),
            attachments,
            sender_node_address,
            date: Utc::now(),
            arrived: false,
            stored_in_mailbox: false,
            is_system_message: false,
            uid: Uuid::new_v4().to_string(),
        }
    }

    /// A generated system message (dispute opened, dispute closed, ...).
    pub fn system(
        trade_id: impl Into<String>,
        trader_id: i32,
        message: impl Into<String>,
        sender_node_address: NodeAddress,
    ) -> Self {
        let mut msg = Self::new(
            trade_id,
            trader_id,
            false,
            message,
            Vec::new(),
            sender_node_address,
        );
        msg.is_system_message = true;
        msg
    }
}

impl PartialEq for ChatMessage {
    fn eq(&self, other: &Self) -> bool {
        // Delivery flags are transient and deliberately ignored.
        self.trade_id == other.trade_id
            && self.trader_id == other.trader_id
            && self.sender_is_trader == other.sender_is_trader
            && self.message == other.message
            && self.attachments == other.attachments
            && self.sender_node_address == other.sender_node_address
            && self.date == other.date
            && self.is_system_message == other.is_system_message
            && self.uid == other.uid
    }
}

impl Eq for ChatMessage {}
