//! Change notifications for the presentation layer.
//!
//! The UI binds to these events instead of observing model fields directly;
//! the protocol core has no dependency on any UI toolkit.

use serde::Serialize;
use tokio::sync::broadcast;

/// State changes a dispute view cares about.
#[derive(Debug, Clone, Serialize)]
pub enum DisputeEvent {
    /// The local trader opened a dispute.
    DisputeOpened { dispute_id: String, trade_id: String },
    /// The arbitrator stored the counterparty's mirrored record.
    DisputeMirrored { dispute_id: String, trade_id: String },
    /// The trading peer opened a dispute against us.
    PeerOpenedDispute { dispute_id: String, trade_id: String },
    ChatMessageAdded { dispute_id: String, uid: String },
    DisputeClosed { dispute_id: String, trade_id: String },
    /// The local node broadcast the payout transaction.
    PayoutPublished { trade_id: String, tx_id: String },
    /// The peer's payout transaction was imported.
    PayoutTxReceived { trade_id: String, tx_id: String },
    /// A message could not be applied even after its single redelivery;
    /// kept for operator inspection.
    MessageStuck {
        kind: String,
        uid: String,
        trade_id: String,
    },
}

/// Broadcast fan-out of [`DisputeEvent`]s. Emitting with no subscribers is
/// a no-op, not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DisputeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisputeEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: DisputeEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
