//! Configuration for the arbitration subsystem.
//!
//! All values are injected at startup; nothing here reads process-wide
//! statics. The arbitrator allow-list in particular is explicit
//! configuration so that production and development nodes differ only in
//! the config they are constructed with.

pub mod arbitrator_keys;
pub mod timing;

pub use arbitrator_keys::ArbitratorKeyList;
pub use timing::{RepublishConfig, RetryConfig};

/// Top-level configuration for the dispute engine and arbitrator registry.
#[derive(Debug, Clone)]
pub struct ArbitrationConfig {
    /// Registration keys trusted to sign arbitrator identities.
    pub key_list: ArbitratorKeyList,
    /// Delays for the single-shot redelivery of causally-premature messages.
    pub retry: RetryConfig,
    /// Identity republish schedule for locally operated arbitrators.
    pub republish: RepublishConfig,
    /// Upper bound on concurrently tracked redelivery timers.
    pub max_pending_retries: usize,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            key_list: ArbitratorKeyList::production(),
            retry: RetryConfig::default(),
            republish: RepublishConfig::default(),
            max_pending_retries: 10_000,
        }
    }
}
