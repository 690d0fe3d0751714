use bitcoin::Amount;
use bitcoin::Transaction;
use serde::Deserialize;
use serde::Serialize;

/// Audit records produced while driving a transaction to confirmation.
/// Consumed by reconciliation and metrics, not by the publisher itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PublisherEvent {
    /// A broadcast attempt was accepted by the mempool. Emitted once per
    /// attempt, so a fee-bumped transaction produces a second record.
    TransactionPublished {
        channel_id: Option<String>,
        remote_node_id: Option<String>,
        tx: Transaction,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        fee: Amount,
        desc: String,
    },
    /// The transaction reached the configured minimum depth.
    TransactionConfirmed {
        channel_id: Option<String>,
        remote_node_id: Option<String>,
        tx: Transaction,
    },
}

/// Capability for publishing [`PublisherEvent`]s, injected at construction
/// so the event bus stays the caller's concern.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PublisherEvent);
}

/// Sink that drops every event.
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: PublisherEvent) {}
}
