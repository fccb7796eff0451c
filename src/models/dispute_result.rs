//! The arbitrator's binding ruling for one dispute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::chat::ChatMessage;

/// Which party the escrowed funds go to (fully or predominantly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    Buyer,
    Seller,
}

/// Why the arbitrator ruled the way they did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeReason {
    Other,
    Bug,
    Usability,
    ProtocolViolation,
    NoReply,
    Scam,
    BankProblems,
}

/// The arbitrator's ruling, value-identified by `(trade_id, trader_id)`.
///
/// `buyer_payout_amount + seller_payout_amount` must equal the escrowed
/// amount minus fees; that invariant is enforced by the signing wallet, the
/// payout algorithm here assumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResult {
    pub trade_id: String,
    pub trader_id: i32,
    pub winner: Winner,
    pub reason: DisputeReason,
    pub tamper_proof_evidence: bool,
    pub summary_notes: String,
    /// The closing system message, attached by the arbitrator when sending
    /// the result.
    pub chat_message: Option<ChatMessage>,
    pub arbitrator_signature: Vec<u8>,
    pub arbitrator_pub_key: Vec<u8>,
    pub buyer_payout_amount: u64,
    pub seller_payout_amount: u64,
    /// Inverts who is expected to broadcast the payout transaction. Used
    /// when the winner is expected to stay offline, so the loser publishes
    /// and the winner collects once they return.
    pub is_loser_publisher: bool,
    pub close_date: DateTime<Utc>,
}

impl DisputeResult {
    /// The party authorized to broadcast the payout transaction.
    ///
    /// The winner publishes; in a 50/50 split the arbitrator sets
    /// `winner = Buyer` since the buyer has more incentive to publish (they
    /// receive the escrowed coin). `is_loser_publisher` inverts the choice.
    /// This is business policy carried over unchanged; a single publisher
    /// avoids two conflicting zero-confirmation spends of the escrow output.
    pub fn effective_publisher(&self) -> Winner {
        if self.is_loser_publisher {
            match self.winner {
                Winner::Buyer => Winner::Seller,
                Winner::Seller => Winner::Buyer,
            }
        } else {
            self.winner
        }
    }
}
