//! Append-mostly collection of dispute records.
//!
//! Loaded in full at startup, mutated only through the engine, persisted
//! write-behind on every mutation. Disputes are never removed, only marked
//! closed.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::DisputeError;
use crate::logging::sanitize_trade_id;
use crate::models::dispute::Dispute;
use crate::traits::DisputePersistence;

pub struct DisputeStore {
    disputes: Vec<Dispute>,
    persistence: Arc<dyn DisputePersistence>,
}

impl DisputeStore {
    /// Load all persisted disputes.
    pub fn load(persistence: Arc<dyn DisputePersistence>) -> Result<Self, DisputeError> {
        let disputes = persistence.load()?;
        debug!(count = disputes.len(), "dispute store loaded");
        Ok(Self {
            disputes,
            persistence,
        })
    }

    /// Store a new dispute. Returns false (and stores nothing) when a
    /// record for the same `(trade_id, trader_id)` already exists.
    pub fn add(&mut self, dispute: Dispute) -> bool {
        if self.contains(dispute.trade_id(), dispute.trader_id()) {
            warn!(
                trade_id = %sanitize_trade_id(dispute.trade_id()),
                "dispute already stored, ignoring add"
            );
            return false;
        }
        self.disputes.push(dispute);
        self.persist();
        true
    }

    /// Replace the stored record with the same identity, or store it fresh.
    /// Used by the reopen path.
    pub fn upsert(&mut self, dispute: Dispute) {
        if let Some(existing) = self
            .disputes
            .iter_mut()
            .find(|d| d.trade_id() == dispute.trade_id() && d.trader_id() == dispute.trader_id())
        {
            *existing = dispute;
        } else {
            self.disputes.push(dispute);
        }
        self.persist();
    }

    pub fn contains(&self, trade_id: &str, trader_id: i32) -> bool {
        self.find(trade_id, trader_id).is_some()
    }

    pub fn find(&self, trade_id: &str, trader_id: i32) -> Option<&Dispute> {
        self.disputes
            .iter()
            .find(|d| d.trade_id() == trade_id && d.trader_id() == trader_id)
    }

    pub fn find_mut(&mut self, trade_id: &str, trader_id: i32) -> Option<&mut Dispute> {
        self.disputes
            .iter_mut()
            .find(|d| d.trade_id() == trade_id && d.trader_id() == trader_id)
    }

    /// First dispute for the trade regardless of trader id. On a trader
    /// node every stored dispute is the node's own.
    pub fn find_by_trade_id(&self, trade_id: &str) -> Option<&Dispute> {
        self.disputes.iter().find(|d| d.trade_id() == trade_id)
    }

    pub fn find_by_trade_id_mut(&mut self, trade_id: &str) -> Option<&mut Dispute> {
        self.disputes.iter_mut().find(|d| d.trade_id() == trade_id)
    }

    /// The dispute (for this trade) holding a chat message with the uid.
    pub fn find_by_chat_uid_mut(&mut self, trade_id: &str, uid: &str) -> Option<&mut Dispute> {
        self.disputes.iter_mut().find(|d| {
            d.trade_id() == trade_id && d.chat_messages().iter().any(|m| m.uid == uid)
        })
    }

    pub fn all(&self) -> impl Iterator<Item = &Dispute> {
        self.disputes.iter()
    }

    pub fn len(&self) -> usize {
        self.disputes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disputes.is_empty()
    }

    /// Force-close open records that share `(trade_id, trader_id)` with an
    /// already-closed record. Persisted data can hold such duplicates when
    /// a trader re-opened while the first close never reached them. Returns
    /// the identity of every record that was forced closed.
    pub fn reconcile_duplicates(&mut self) -> Vec<(String, i32)> {
        let closed: std::collections::HashSet<(String, i32)> = self
            .disputes
            .iter()
            .filter(|d| d.is_closed())
            .map(|d| (d.trade_id().to_string(), d.trader_id()))
            .collect();
        let mut forced = Vec::new();
        for dispute in self.disputes.iter_mut() {
            let key = (dispute.trade_id().to_string(), dispute.trader_id());
            if !dispute.is_closed() && closed.contains(&key) {
                dispute.set_closed();
                forced.push(key);
            }
        }
        if !forced.is_empty() {
            self.persist();
        }
        forced
    }

    /// Queue a write-behind snapshot. Callers invoke this after mutating a
    /// record obtained via `find_mut`.
    pub fn persist(&self) {
        self.persistence.queue_write(self.disputes.clone());
    }
}
