//! Interfaces to the Bitcoin Core node consumed by publishers and monitors.
//!
//! The node is assumed to speak a Bitcoin-Core-like RPC. Implementations
//! live with the caller; this crate only defines the surface it needs and
//! the classification of the two publish-error strings it must recognize.

use async_trait::async_trait;
use bitcoin::FeeRate;
use bitcoin::OutPoint;
use bitcoin::Transaction;
use bitcoin::Txid;
use thiserror::Error;

use crate::models::BlockHeight;

#[derive(Debug, Clone, Error)]
pub enum ChainClientError {
    /// RPC-level failure. The message is the node's human-readable error
    /// text, which for `sendrawtransaction` is worth classifying (see
    /// [`classify_publish_error`]).
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// What a failed `sendrawtransaction` means for the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishErrorClass {
    /// A conflicting mempool transaction could not be replaced.
    RejectedReplacement,
    /// At least one input is unknown or already spent.
    MissingOrSpentInputs,
    Other,
}

/// Bitcoin Core reports publish failures as human-readable strings, so
/// substring matching is the only classification available. The coupling to
/// those strings lives in this one function.
pub fn classify_publish_error(message: &str) -> PublishErrorClass {
    if message.contains("rejecting replacement") {
        PublishErrorClass::RejectedReplacement
    } else if message.contains("bad-txns-inputs-missingorspent") {
        PublishErrorClass::MissingOrSpentInputs
    } else {
        PublishErrorClass::Other
    }
}

/// The node-side operations the publisher and its monitors rely on.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    async fn publish_transaction(&self, tx: &Transaction) -> Result<(), ChainClientError>;

    /// `Ok(None)` means the node does not know the transaction at all:
    /// either it was never seen or it has been evicted. `Ok(Some(0))` means
    /// it is sitting in the mempool.
    async fn get_tx_confirmations(&self, txid: Txid) -> Result<Option<u32>, ChainClientError>;

    /// Whether the output exists and is unspent, optionally treating
    /// mempool spenders as spends.
    async fn is_transaction_output_spendable(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<bool, ChainClientError>;

    /// Tell the wallet to forget an unconfirmed transaction. A no-op for
    /// mined or still-live transactions; callers ignore failures.
    async fn abandon_transaction(&self, txid: Txid) -> Result<(), ChainClientError>;

    /// Release wallet UTXO locks taken while funding.
    async fn unlock_outpoints(&self, outpoints: &[OutPoint]) -> Result<(), ChainClientError>;

    async fn get_block_count(&self) -> Result<BlockHeight, ChainClientError>;
}

/// Feerate oracle. Typically backed by the node's `estimatesmartfee`, but
/// any source will do as long as it answers for the block targets produced
/// by [`crate::fee_bumping::confirmation_target`].
pub trait FeeEstimator: Send + Sync {
    /// Feerate expected to get a transaction mined within `block_target`
    /// blocks.
    fn feerate_for_target(&self, block_target: u16) -> FeeRate;
}
