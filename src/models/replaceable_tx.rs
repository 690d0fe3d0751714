use bitcoin::Amount;
use bitcoin::FeeRate;
use bitcoin::OutPoint;
use bitcoin::Transaction;
use bitcoin::Txid;
use serde::Deserialize;
use serde::Serialize;

use super::BlockHeight;

/// A pre-signed transaction and the block height by which it must be mined
/// for the contract it claims to remain safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceableTxInfo {
    pub tx: Transaction,
    pub confirm_before: BlockHeight,
}

/// Witness-construction data the funder needs to sign the claimed input.
///
/// The variants mirror the commitment outputs a channel can claim: the two
/// anchors, the four HTLC branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WitnessData {
    LocalAnchor,
    RemoteAnchor,
    HtlcSuccess { payment_preimage: [u8; 32] },
    HtlcTimeout,
    ClaimHtlcSuccess { payment_preimage: [u8; 32] },
    ClaimHtlcTimeout,
}

/// Everything needed to publish one replaceable transaction. Immutable for
/// the lifetime of the publisher that receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    /// The contract outpoint the transaction claims. Wallet inputs added by
    /// the funder are extra funding on top of this one; since this outpoint
    /// is not a wallet lock, the publisher never unlocks it.
    pub input_outpoint: OutPoint,

    pub tx_info: ReplaceableTxInfo,

    /// Human-readable tag for logs and events, e.g. `"local-anchor"` or
    /// `"htlc-success"`.
    pub desc: String,

    pub witness_data: WitnessData,
}

/// Pre-publisher output: the verified transaction together with the witness
/// data the funder will need.
#[derive(Debug, Clone)]
pub struct TxWithWitnessData {
    pub tx: Transaction,
    pub witness_data: WitnessData,
}

/// Funder output: a fully signed transaction with the fee it pays and the
/// effective feerate that fee buys at the transaction's size.
#[derive(Debug, Clone)]
pub struct FundedTx {
    pub signed_tx: Transaction,
    pub fee: Amount,
    pub feerate: FeeRate,
}

impl FundedTx {
    pub fn txid(&self) -> Txid {
        self.signed_tx.compute_txid()
    }

    /// The wallet-owned inputs: everything the transaction spends except the
    /// claimed contract outpoint.
    pub fn wallet_inputs(&self, input_outpoint: OutPoint) -> Vec<OutPoint> {
        self.signed_tx
            .input
            .iter()
            .map(|txin| txin.previous_output)
            .filter(|outpoint| *outpoint != input_outpoint)
            .collect()
    }
}

/// Identification attached to every log line and event a publisher emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishContext {
    pub publish_id: u64,
    pub channel_id: Option<String>,
    pub remote_node_id: Option<String>,
    pub tx_desc: String,
}

impl PublishContext {
    /// Context with a fresh random publish id and no channel attribution.
    pub fn new(tx_desc: impl Into<String>) -> Self {
        Self {
            publish_id: rand::random(),
            channel_id: None,
            remote_node_id: None,
            tx_desc: tx_desc.into(),
        }
    }
}
