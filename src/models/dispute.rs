//! The per-trader dispute record.
//!
//! One dispute exists per `(trade_id, trader_id)` pair: the opener holds
//! one, the arbitrator holds one per trader, and the counterparty holds the
//! mirror the arbitrator forwards. Records are append-mostly and never
//! deleted; a settled dispute is only marked closed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::logging::sanitize_trade_id;
use crate::models::chat::ChatMessage;
use crate::models::contract::Contract;
use crate::models::dispute_result::DisputeResult;
use crate::models::keys::PubKeyRing;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    trade_id: String,
    /// Composite identity: `trade_id + "_" + trader_id`.
    id: String,
    trader_id: i32,
    pub dispute_opener_is_buyer: bool,
    pub dispute_opener_is_maker: bool,
    trader_pub_key_ring: PubKeyRing,
    arbitrator_pub_key_ring: PubKeyRing,
    pub trade_date: DateTime<Utc>,
    contract: Contract,
    contract_hash: Vec<u8>,
    contract_as_json: String,
    pub deposit_tx_serialized: Option<Vec<u8>>,
    pub payout_tx_serialized: Option<Vec<u8>>,
    pub deposit_tx_id: Option<String>,
    pub payout_tx_id: Option<String>,
    pub maker_contract_signature: Option<String>,
    pub taker_contract_signature: Option<String>,
    /// A support ticket runs through the same machinery but was opened
    /// without a counterparty conflict.
    pub is_support_ticket: bool,
    chat_messages: Vec<ChatMessage>,
    is_closed: bool,
    dispute_result: Option<DisputeResult>,
    dispute_payout_tx_id: Option<String>,
    opening_date: DateTime<Utc>,
}

impl Dispute {
    pub fn new(
        trade_id: impl Into<String>,
        trader_pub_key_ring: PubKeyRing,
        arbitrator_pub_key_ring: PubKeyRing,
        dispute_opener_is_buyer: bool,
        dispute_opener_is_maker: bool,
        contract: Contract,
    ) -> Result<Self> {
        let trade_id = trade_id.into();
        let trader_id = trader_pub_key_ring.trader_id();
        let contract_hash = contract.hash()?;
        let contract_as_json = contract.as_json()?;
        Ok(Self {
            id: format!("{}_{}", trade_id, trader_id),
            trade_id,
            trader_id,
            dispute_opener_is_buyer,
            dispute_opener_is_maker,
            trader_pub_key_ring,
            arbitrator_pub_key_ring,
            trade_date: Utc::now(),
            contract,
            contract_hash,
            contract_as_json,
            deposit_tx_serialized: None,
            payout_tx_serialized: None,
            deposit_tx_id: None,
            payout_tx_id: None,
            maker_contract_signature: None,
            taker_contract_signature: None,
            is_support_ticket: false,
            chat_messages: Vec::new(),
            is_closed: false,
            dispute_result: None,
            dispute_payout_tx_id: None,
            opening_date: Utc::now(),
        })
    }

    /// The record the arbitrator stores and forwards for the counterparty.
    /// Trade snapshot fields are copied, the trader becomes the peer, and
    /// the opener flags are inverted (they describe the record holder's
    /// perspective).
    pub fn mirrored_for_peer(&self) -> Result<Dispute> {
        let peer_ring = self
            .contract
            .ring_of(!self.dispute_opener_is_buyer)
            .clone();
        let mut mirror = Dispute::new(
            self.trade_id.clone(),
            peer_ring,
            self.arbitrator_pub_key_ring.clone(),
            !self.dispute_opener_is_buyer,
            !self.dispute_opener_is_maker,
            self.contract.clone(),
        )?;
        mirror.trade_date = self.trade_date;
        mirror.deposit_tx_serialized = self.deposit_tx_serialized.clone();
        mirror.payout_tx_serialized = self.payout_tx_serialized.clone();
        mirror.deposit_tx_id = self.deposit_tx_id.clone();
        mirror.payout_tx_id = self.payout_tx_id.clone();
        mirror.maker_contract_signature = self.maker_contract_signature.clone();
        mirror.taker_contract_signature = self.taker_contract_signature.clone();
        mirror.is_support_ticket = self.is_support_ticket;
        Ok(mirror)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }

    pub fn trader_id(&self) -> i32 {
        self.trader_id
    }

    pub fn trader_pub_key_ring(&self) -> &PubKeyRing {
        &self.trader_pub_key_ring
    }

    pub fn arbitrator_pub_key_ring(&self) -> &PubKeyRing {
        &self.arbitrator_pub_key_ring
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn contract_hash(&self) -> &[u8] {
        &self.contract_hash
    }

    pub fn contract_as_json(&self) -> &str {
        &self.contract_as_json
    }

    pub fn opening_date(&self) -> DateTime<Utc> {
        self.opening_date
    }

    pub fn chat_messages(&self) -> &[ChatMessage] {
        &self.chat_messages
    }

    pub fn contains_chat_message(&self, message: &ChatMessage) -> bool {
        self.chat_messages.contains(message)
    }

    /// Append a conversation entry. Callers deduplicate first via
    /// [`contains_chat_message`](Self::contains_chat_message).
    pub fn add_chat_message(&mut self, message: ChatMessage) {
        self.chat_messages.push(message);
    }

    pub fn chat_message_by_uid_mut(&mut self, uid: &str) -> Option<&mut ChatMessage> {
        self.chat_messages.iter_mut().find(|m| m.uid == uid)
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn set_closed(&mut self) {
        self.is_closed = true;
    }

    pub fn dispute_result(&self) -> Option<&DisputeResult> {
        self.dispute_result.as_ref()
    }

    /// Record the ruling. A second result for an already-closed dispute is
    /// tolerated (it happens when a close has to be repeated after an
    /// arbitrator restart) but logged as an anomaly.
    pub fn set_dispute_result(&mut self, result: DisputeResult) {
        if self.dispute_result.is_some() {
            warn!(
                trade_id = %sanitize_trade_id(&self.trade_id),
                "dispute result overwritten; this should only happen when a \
                 dispute needs to be closed a second time"
            );
        }
        self.dispute_result = Some(result);
    }

    pub fn dispute_payout_tx_id(&self) -> Option<&str> {
        self.dispute_payout_tx_id.as_deref()
    }

    pub fn set_dispute_payout_tx_id(&mut self, tx_id: impl Into<String>) {
        self.dispute_payout_tx_id = Some(tx_id.into());
    }
}
