use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Confirmations after which a transaction is treated as irreversible.
const DEFAULT_MIN_DEPTH_BLOCKS: u32 = 6;

/// Upper bound of the random fee-check delay, in milliseconds.
const DEFAULT_MAX_TX_PUBLISH_RETRY_DELAY_MS: u64 = 60_000;

/// Delay before an intermediate monitor report observed during a
/// replace-by-fee race is re-delivered, in milliseconds.
const DEFAULT_INTERMEDIATE_REDELIVERY_DELAY_MS: u64 = 1_000;

/// Runtime knobs for replaceable-transaction publishers.
///
/// One instance is shared by all publishers of a node; each publisher takes
/// a copy at spawn time, so changing the config never affects publishers
/// already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Number of confirmations after which a published transaction is
    /// reported as confirmed and the publisher stops watching it.
    pub min_depth_blocks: u32,

    /// Upper bound of the random delay between a mempool sighting and the
    /// fee check it schedules. The jitter spreads fee bumps of many
    /// publishers over the minute after a block instead of hammering the
    /// fee estimator and the mempool the moment the block arrives.
    pub max_tx_publish_retry_delay: Duration,

    /// How long an intermediate monitor report is delayed before being
    /// looked at again while two conflicting attempts race in the mempool.
    /// Such a report may predate the monitor learning about the
    /// replacement and must not feed a fee-bump decision.
    pub intermediate_redelivery_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            min_depth_blocks: DEFAULT_MIN_DEPTH_BLOCKS,
            max_tx_publish_retry_delay: Duration::from_millis(
                DEFAULT_MAX_TX_PUBLISH_RETRY_DELAY_MS,
            ),
            intermediate_redelivery_delay: Duration::from_millis(
                DEFAULT_INTERMEDIATE_REDELIVERY_DELAY_MS,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_serde() {
        let config = PublisherConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: PublisherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.min_depth_blocks, restored.min_depth_blocks);
        assert_eq!(
            config.max_tx_publish_retry_delay,
            restored.max_tx_publish_retry_delay
        );
        assert_eq!(
            config.intermediate_redelivery_delay,
            restored.intermediate_redelivery_delay
        );
    }
}
