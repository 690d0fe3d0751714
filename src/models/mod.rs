pub mod channel;
pub mod events;
pub mod replaceable_tx;
pub mod tx_result;

/// Block heights as reported by the blockchain client.
pub type BlockHeight = u64;
