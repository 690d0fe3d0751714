//! Fee policy for replaceable transactions: which block target to feed the
//! estimator, and when a mempool attempt should be replaced by fee.

use bitcoin::FeeRate;

use crate::models::BlockHeight;

/// Any replacement must raise the feerate to at least this percentage of
/// the previous attempt's, which keeps replacements above the relay
/// incremental-fee requirement in the typical case.
pub const FEE_BUMP_RATIO_PERCENT: u64 = 120;

/// Within this many blocks of the deadline, bumps are unconditional.
pub const AGGRESSIVE_BUMP_WINDOW_BLOCKS: u64 = 6;

/// Block target to feed the estimator given how many blocks remain until
/// the deadline.
///
/// Mostly "aim for the deadline", except that the target drops faster than
/// the remaining time once fewer than 36 blocks are left (18 remaining
/// already maps to a target of 12). Falling behind the market near the
/// deadline costs funds; overpaying a little does not.
pub fn confirmation_target(remaining_blocks: BlockHeight) -> u16 {
    match remaining_blocks {
        n if n >= 144 => 144,
        n if n >= 72 => 72,
        n if n >= 36 => 36,
        n if n >= 18 => 12,
        n if n >= 12 => 6,
        n if n >= 2 => 2,
        _ => 1,
    }
}

/// The lowest feerate a replacement of `previous` may use.
pub fn bump_floor(previous: FeeRate) -> FeeRate {
    FeeRate::from_sat_per_kwu(
        previous
            .to_sat_per_kwu()
            .saturating_mul(FEE_BUMP_RATIO_PERCENT)
            / 100,
    )
}

/// Decide whether the current attempt should be replaced.
///
/// Returns the target feerate for the replacement, or `None` to keep the
/// current attempt. Close to the deadline we always bump, even when the
/// estimator has not moved; otherwise we only bump when the market rate
/// has grown past the 20% floor, so every replacement is worth its relay
/// cost.
pub fn bump_decision(
    remaining_blocks: BlockHeight,
    current_estimate: FeeRate,
    previous_feerate: FeeRate,
) -> Option<FeeRate> {
    let floor = bump_floor(previous_feerate);
    if remaining_blocks <= AGGRESSIVE_BUMP_WINDOW_BLOCKS {
        Some(floor.max(current_estimate))
    } else if floor <= current_estimate {
        Some(current_estimate)
    } else {
        None
    }
}
