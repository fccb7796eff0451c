//! Data model for disputes, rulings and published arbitrator identities.

pub mod arbitrator;
pub mod chat;
pub mod contract;
pub mod dispute;
pub mod dispute_result;
pub mod keys;

pub use arbitrator::{AgentRole, ArbitratorIdentity};
pub use chat::{Attachment, ChatMessage};
pub use contract::Contract;
pub use dispute::Dispute;
pub use dispute_result::{DisputeReason, DisputeResult, Winner};
pub use keys::{NodeAddress, PubKeyRing};
