//! Timing configuration: redelivery delays and identity republishing.

use std::time::Duration;

use crate::models::arbitrator::IDENTITY_TTL;

/// Delays for the one-shot redelivery of messages that arrive before their
/// causal prerequisite exists locally.
///
/// The result and payout-tx delays are longer than the chat delay so that a
/// reordered burst settles in dependency order: chat messages first, then
/// the result, then the payout transaction.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base unit for redelivery delays.
    pub unit: Duration,
}

impl RetryConfig {
    /// Delay before redelivering a chat message with no matching dispute.
    pub fn chat_delay(&self) -> Duration {
        self.unit
    }

    /// Delay before redelivering a dispute result with no matching dispute.
    pub fn result_delay(&self) -> Duration {
        self.unit * 2
    }

    /// Delay before redelivering a peer payout-tx message with no matching
    /// dispute.
    pub fn payout_tx_delay(&self) -> Duration {
        self.unit * 3
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
        }
    }
}

/// Republish schedule for a locally operated arbitrator identity.
///
/// Published identity records expire after `ttl` on the network store, so a
/// bootstrapped arbitrator re-announces itself at half that interval. The
/// first publish happens shortly after startup and is repeated once soon
/// after, since the initial announce often races the bootstrap.
#[derive(Debug, Clone)]
pub struct RepublishConfig {
    /// Network lifetime of a published identity record.
    pub ttl: Duration,
    /// Delay between startup and the first publish attempt.
    pub startup_delay: Duration,
    /// Delay before the one-time repeat of the startup publish.
    pub startup_repeat_delay: Duration,
    /// Retry interval while a publish attempt keeps failing.
    pub retry_interval: Duration,
}

impl RepublishConfig {
    /// Steady-state republish interval: half the record TTL.
    pub fn republish_interval(&self) -> Duration {
        self.ttl / 2
    }
}

impl Default for RepublishConfig {
    fn default() -> Self {
        Self {
            ttl: IDENTITY_TTL,
            startup_delay: Duration::from_secs(60),
            startup_repeat_delay: Duration::from_secs(300),
            retry_interval: Duration::from_secs(5),
        }
    }
}
