//! One-shot delayed redelivery of causally-premature messages.
//!
//! A message referencing a dispute that does not exist locally yet gets
//! exactly one delayed redelivery, keyed by its uid. The entry stays in the
//! map after the timer fires: a second miss for the same uid is a permanent
//! anomaly, never a second timer. Entries are removed the moment the
//! message applies through any path.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::EngineCommand;
use crate::logging::{sanitize_trade_id, sanitize_uid};
use crate::messages::DisputeMessage;

pub struct RetryScheduler {
    pending: HashMap<String, JoinHandle<()>>,
    max_pending: usize,
}

impl RetryScheduler {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_pending,
        }
    }

    /// Schedule a single redelivery of `message` after `delay`. Returns
    /// false without scheduling when the uid is already tracked (the one
    /// permitted retry was already used or is in flight) or the scheduler
    /// is full.
    pub(crate) fn schedule(
        &mut self,
        delay: Duration,
        message: DisputeMessage,
        engine_tx: mpsc::Sender<EngineCommand>,
    ) -> bool {
        let uid = message.uid().to_string();
        if self.pending.contains_key(&uid) {
            return false;
        }
        if self.pending.len() >= self.max_pending {
            warn!(
                uid = %sanitize_uid(&uid),
                max = self.max_pending,
                "retry scheduler full, dropping redelivery request"
            );
            return false;
        }
        debug!(
            uid = %sanitize_uid(&uid),
            trade_id = %sanitize_trade_id(message.trade_id()),
            kind = message.kind(),
            ?delay,
            "scheduling single redelivery"
        );
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = engine_tx.send(EngineCommand::Redeliver(message)).await;
        });
        self.pending.insert(uid, handle);
        true
    }

    /// Cancel and forget the timer for this uid; called when the message
    /// was applied through any path.
    pub fn cancel(&mut self, uid: &str) {
        if let Some(handle) = self.pending.remove(uid) {
            handle.abort();
        }
    }

    pub fn is_tracked(&self, uid: &str) -> bool {
        self.pending.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
