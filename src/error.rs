//! Error taxonomy for the arbitration subsystem.
//!
//! Every failure is handled locally inside the engine or coordinator; only
//! terminal conditions (signing wallet gone, storage gone) are surfaced to
//! the operator-facing layer. No error unwinds across a message-handling
//! boundary.

use thiserror::Error;

/// Errors raised by the dispute engine, payout coordinator and registry.
#[derive(Error, Debug)]
pub enum DisputeError {
    /// The wrong role attempted an action, e.g. a trader received a message
    /// reserved for arbitrators. Logged at error level and dropped.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A dispute for this trade and trading peer is already stored.
    #[error("dispute already open for trade {trade_id}")]
    DisputeAlreadyOpen { trade_id: String },

    /// No stored dispute matches the given trade.
    #[error("no dispute found for trade {trade_id}")]
    DisputeNotFound { trade_id: String },

    /// The message was already applied (deduplicated by uid or value).
    #[error("duplicate message {uid} for trade {trade_id}")]
    DuplicateMessage { trade_id: String, uid: String },

    /// The payout cannot be signed because the dispute carries no serialized
    /// deposit transaction.
    #[error("deposit transaction missing for trade {trade_id}")]
    DepositTxMissing { trade_id: String },

    /// The signing wallet refused to co-sign the payout.
    #[error("payout signing failed: {0}")]
    SigningFailed(String),

    /// The payout transaction was rejected by the ledger network.
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    /// The mailbox transport reported a fault while sending.
    #[error("mailbox delivery failed: {0}")]
    MessageDeliveryFailed(String),

    /// Durable storage could not be read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The engine task is gone and can no longer accept commands.
    #[error("dispute engine unavailable")]
    EngineUnavailable,
}

impl DisputeError {
    /// Whether retrying the same operation later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DisputeError::BroadcastFailed(_) | DisputeError::MessageDeliveryFailed(_)
        )
    }

    /// Whether this is a protocol violation that must never mutate state.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, DisputeError::ProtocolViolation(_))
    }
}
