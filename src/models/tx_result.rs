use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Why a broadcast attempt, or the whole publisher, gave up on getting a
/// transaction mined.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TxRejectedReason {
    /// A conflicting transaction sits in the mempool and ours does not pay
    /// enough to replace it. The caller may retry once the conflict is gone.
    #[error("a conflicting transaction is in the mempool and cannot be replaced")]
    ConflictingTxUnconfirmed,

    /// A conflicting transaction has been mined: the claimed output is gone
    /// for good and the caller has to replan.
    #[error("a conflicting transaction has been confirmed")]
    ConflictingTxConfirmed,

    /// The wallet double-spent one of the funding inputs it had given us.
    #[error("a wallet input has been spent elsewhere")]
    WalletInputGone,

    #[error("unknown failure")]
    UnknownTxFailure,

    /// Nothing could be decided, typically because a status probe failed.
    /// With `retry_next_block` set the caller should try again after the
    /// next block instead of giving up.
    #[error("publish skipped (retry next block: {retry_next_block})")]
    TxSkipped { retry_next_block: bool },

    #[error("preconditions failed: {0}")]
    PreconditionsFailed(String),

    #[error("funding failed: {0}")]
    FundingFailed(String),
}

/// Result of probing the claimed input after its spending transaction went
/// missing from the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputStatus {
    pub spent_confirmed: bool,
    pub spent_unconfirmed: bool,
}

impl InputStatus {
    /// Derive the input status from the parent's confirmation count and the
    /// two spendability probes (excluding and including the mempool):
    ///
    /// | parent confs | spent_confirmed | spent_unconfirmed          |
    /// |--------------|-----------------|----------------------------|
    /// | `Some(0)`    | `false`         | `!spendable_incl`          |
    /// | `Some(n≥1)`  | `!spendable_excl` | `spendable_excl && !spendable_incl` |
    /// | `None`       | `false`         | `false`                    |
    ///
    /// An unconfirmed parent cannot have a confirmed spender, and an unknown
    /// parent tells us nothing about spenders at all.
    pub fn derive(
        parent_confirmations: Option<u32>,
        spendable_excl: bool,
        spendable_incl: bool,
    ) -> Self {
        match parent_confirmations {
            Some(0) => Self {
                spent_confirmed: false,
                spent_unconfirmed: !spendable_incl,
            },
            Some(_) => Self {
                spent_confirmed: !spendable_excl,
                spent_unconfirmed: spendable_excl && !spendable_incl,
            },
            None => Self {
                spent_confirmed: false,
                spent_unconfirmed: false,
            },
        }
    }
}
