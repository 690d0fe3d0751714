use std::fmt;

use bitcoin::Transaction;
use bitcoin::Txid;

use super::replaceable_tx::FundedTx;
use super::replaceable_tx::PublishRequest;
use super::replaceable_tx::TxWithWitnessData;
use super::tx_result::TxRejectedReason;
use super::BlockHeight;

/// Identifies one broadcast attempt within a publisher. During a
/// replace-by-fee race two attempts are alive at once and their monitor
/// reports must not be confused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Status reports from a mempool monitor to its publisher. Exactly one of
/// the final variants is sent per monitor, after which the monitor stops.
#[derive(Clone, Debug)]
pub enum MonitorToPublisher {
    /// The transaction is still waiting in the mempool as of the given
    /// block height.
    TxInMempool { txid: Txid, block_height: BlockHeight },
    /// Mined, but not yet deep enough to be treated as irreversible.
    TxRecentlyConfirmed { txid: Txid, confirmations: u32 },
    /// Final: buried under the configured minimum depth.
    TxDeeplyBuried { tx: Transaction },
    /// Final: this attempt will not confirm.
    TxRejected { txid: Txid, reason: TxRejectedReason },
}

impl MonitorToPublisher {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            MonitorToPublisher::TxDeeplyBuried { .. } | MonitorToPublisher::TxRejected { .. }
        )
    }

    pub fn get_type(&self) -> String {
        match self {
            MonitorToPublisher::TxInMempool { .. } => "tx in mempool".to_string(),
            MonitorToPublisher::TxRecentlyConfirmed { .. } => "tx recently confirmed".to_string(),
            MonitorToPublisher::TxDeeplyBuried { .. } => "tx deeply buried".to_string(),
            MonitorToPublisher::TxRejected { .. } => "tx rejected".to_string(),
        }
    }
}

/// Everything that can land in a publisher's mailbox: the caller's stop
/// command, results from its helper tasks, monitor reports and its own
/// timers. One channel keeps the arrival order unambiguous.
#[derive(Debug)]
pub enum PublisherMessage {
    /// Caller-initiated teardown. After a terminal result this doubles as
    /// the go-ahead to abandon retired attempts and release their UTXOs.
    Stop,
    /// Outcome of the precondition check.
    Preconditions(Result<TxWithWitnessData, String>),
    /// The transaction's time locks are satisfied.
    TimeLocksOk,
    /// Outcome of a funding attempt, initial or replacement.
    Funding(Result<FundedTx, String>),
    /// Report from the monitor of one broadcast attempt.
    Monitor {
        attempt: AttemptId,
        result: MonitorToPublisher,
    },
    /// The jittered fee-check timer fired; decide whether to bump.
    CheckFee { block_height: BlockHeight },
    /// The cleanup task finished abandoning and unlocking.
    UtxosUnlocked,
}

impl PublisherMessage {
    pub fn get_type(&self) -> String {
        match self {
            PublisherMessage::Stop => "stop".to_string(),
            PublisherMessage::Preconditions(_) => "preconditions".to_string(),
            PublisherMessage::TimeLocksOk => "time locks ok".to_string(),
            PublisherMessage::Funding(_) => "funding".to_string(),
            PublisherMessage::Monitor { result, .. } => {
                format!("monitor: {}", result.get_type())
            }
            PublisherMessage::CheckFee { .. } => "check fee".to_string(),
            PublisherMessage::UtxosUnlocked => "utxos unlocked".to_string(),
        }
    }
}

/// Terminal outcome delivered to the caller, exactly once per publisher.
#[derive(Debug, Clone)]
pub enum PublishResult {
    TxConfirmed {
        request: PublishRequest,
        tx: Transaction,
    },
    TxRejected {
        publish_id: u64,
        request: PublishRequest,
        reason: TxRejectedReason,
    },
}
