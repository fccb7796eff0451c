//! Dispute arbitration and trade-settlement finalization for the Kestrel
//! peer-to-peer exchange node.
//!
//! Trades on Kestrel are collateralized by a multi-signature escrow between
//! buyer, seller and a trusted arbitrator. When payment verification fails or
//! a peer disappears, either trader can escalate to the arbitrator, who
//! reviews evidence exchanged over the encrypted mailbox transport and issues
//! a binding payout ruling.
//!
//! This crate owns the dispute state machine, its wire protocol, the
//! payout-authorization algorithm and the arbitrator trust registry. It stays
//! consistent across three independent, occasionally-offline parties that
//! only communicate through store-and-forward messages delivered
//! at-least-once and in no particular order.
//!
//! The transport, wallet, trade manager and persistence layers are external
//! collaborators behind the traits in [`traits`].

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod messages;
pub mod models;
pub mod payout;
pub mod registry;
pub mod retry;
pub mod store;
pub mod traits;

pub use engine::{DisputeEngine, DisputeEngineHandle};
pub use error::DisputeError;
pub use events::{DisputeEvent, EventBus};
pub use messages::DisputeMessage;
pub use registry::ArbitratorRegistry;
pub use store::DisputeStore;
