//! Wallet-side collaborators a publisher spawns while preparing a
//! broadcast. All three run out-of-process from the publisher's point of
//! view: they report a typed outcome and never panic across the boundary.

use async_trait::async_trait;
use bitcoin::FeeRate;
use bitcoin::Transaction;

use crate::models::replaceable_tx::FundedTx;
use crate::models::replaceable_tx::PublishRequest;
use crate::models::replaceable_tx::TxWithWitnessData;

/// Verifies that a replaceable transaction is still worth publishing:
/// parent commitment confirmed, signatures valid, amounts above dust,
/// anchor-specific preconditions.
#[async_trait]
pub trait PrePublisher: Send + Sync {
    async fn verify_preconditions(
        &self,
        request: &PublishRequest,
    ) -> Result<TxWithWitnessData, String>;
}

/// Adds wallet inputs and outputs to a pre-signed transaction and signs the
/// result.
///
/// Contract: the returned transaction spends `request.input_outpoint`; its
/// wallet inputs are locked in the wallet until the publisher unlocks them;
/// `feerate * vsize` approximates `fee`. When `previous` is given, the
/// result is a replacement that conflicts with it (both spend the claimed
/// outpoint). A failed invocation leaves no wallet locks behind.
#[async_trait]
pub trait TxFunder: Send + Sync {
    async fn fund(
        &self,
        tx: &TxWithWitnessData,
        request: &PublishRequest,
        target_feerate: FeeRate,
        previous: Option<&FundedTx>,
    ) -> Result<FundedTx, String>;
}

/// Resolves once the transaction's absolute and relative time locks are
/// satisfied. Anchor claims carry no locks, so this usually returns
/// immediately.
#[async_trait]
pub trait TimeLockMonitor: Send + Sync {
    async fn wait_for_timelocks(&self, tx: &Transaction);
}
