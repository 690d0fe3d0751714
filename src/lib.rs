//! Drives pre-signed, fee-bumpable Bitcoin transactions to confirmation.
//!
//! A Lightning channel regularly needs to get a transaction mined before a
//! deadline: anchor-output claims that pay the fees of a stuck commitment
//! transaction, HTLC claims that must win a race against the counterparty.
//! Those transactions are pre-signed with a low (or zero) fee and get their
//! actual fees from wallet inputs added at publish time, which means they can
//! and must be replaced when the feerate market moves.
//!
//! Two cooperating tasks do the work:
//!
//! * [`publisher_loop`] runs one publisher per transaction. It checks
//!   preconditions, waits out time locks, asks the wallet-side funder for a
//!   signed funding of the transaction, publishes it, and replaces it by fee
//!   when the confirmation deadline comes closer. It owns every wallet UTXO
//!   locked on its behalf and releases them on all exit paths.
//! * [`monitor_loop`] runs one monitor per broadcast attempt. It publishes a
//!   single signed transaction and reports mempool sightings, confirmations
//!   and definitive rejections back to its publisher, terminating after
//!   exactly one final report.
//!
//! The wallet, the fee estimator and the Bitcoin Core RPC connection are
//! injected through the traits in [`chain`] and [`funding`]; this crate does
//! not ship implementations of them.

pub mod chain;
pub mod config_models;
pub mod fee_bumping;
pub mod funding;
pub mod models;
pub mod monitor_loop;
pub mod publisher_loop;

#[cfg(test)]
pub(crate) mod tests;

/// Capacity of a publisher's mailbox. Also bounds the stash used while a
/// funding attempt is in flight.
pub const PUBLISHER_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the block-height broadcast channel monitors subscribe to. A
/// lagged monitor only cares about the most recent height, so a small buffer
/// is enough.
pub const BLOCK_CHANNEL_CAPACITY: usize = 64;
