//! Scriptable doubles for the external collaborators, plus deterministic
//! transaction builders. Every mock records the calls the tests assert on.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::Amount;
use bitcoin::FeeRate;
use bitcoin::OutPoint;
use bitcoin::ScriptBuf;
use bitcoin::Sequence;
use bitcoin::Transaction;
use bitcoin::TxIn;
use bitcoin::TxOut;
use bitcoin::Txid;
use bitcoin::Witness;
use tokio::sync::Semaphore;

use crate::chain::BlockchainClient;
use crate::chain::ChainClientError;
use crate::chain::FeeEstimator;
use crate::funding::PrePublisher;
use crate::funding::TimeLockMonitor;
use crate::funding::TxFunder;
use crate::models::events::EventSink;
use crate::models::events::PublisherEvent;
use crate::models::replaceable_tx::FundedTx;
use crate::models::replaceable_tx::PublishRequest;
use crate::models::replaceable_tx::ReplaceableTxInfo;
use crate::models::replaceable_tx::TxWithWitnessData;
use crate::models::replaceable_tx::WitnessData;
use crate::models::BlockHeight;

/// Deterministic transaction spending `inputs`, with a single output of
/// `value_sat`. Distinct values yield distinct txids.
pub fn make_tx(inputs: &[OutPoint], value_sat: u64) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|outpoint| TxIn {
                previous_output: *outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::from_sat(value_sat),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

/// A unique outpoint derived from `seed`.
pub fn make_outpoint(seed: u64) -> OutPoint {
    OutPoint::new(make_tx(&[], 50_000 + seed).compute_txid(), 0)
}

/// A funded transaction spending the claimed outpoint plus the given wallet
/// inputs.
pub fn make_funded_tx(
    input_outpoint: OutPoint,
    wallet_inputs: &[OutPoint],
    fee_sat: u64,
    feerate_kwu: u64,
) -> FundedTx {
    let mut inputs = vec![input_outpoint];
    inputs.extend_from_slice(wallet_inputs);
    FundedTx {
        signed_tx: make_tx(&inputs, 9_000),
        fee: Amount::from_sat(fee_sat),
        feerate: FeeRate::from_sat_per_kwu(feerate_kwu),
    }
}

/// A local-anchor publish request claiming [`make_outpoint`]`(1)`.
pub fn make_request(confirm_before: BlockHeight) -> PublishRequest {
    let input_outpoint = make_outpoint(1);
    PublishRequest {
        input_outpoint,
        tx_info: ReplaceableTxInfo {
            tx: make_tx(&[input_outpoint], 5_000),
            confirm_before,
        },
        desc: "local-anchor".to_string(),
        witness_data: WitnessData::LocalAnchor,
    }
}

#[derive(Default)]
struct ChainState {
    block_count: BlockHeight,
    confirmations: HashMap<Txid, Option<u32>>,
    confirmation_failures: HashMap<Txid, u32>,
    publish_failures: HashMap<Txid, String>,
    next_publish_failure: Option<String>,
    spendable_excl: HashMap<OutPoint, bool>,
    spendable_incl: HashMap<OutPoint, bool>,
    probes_fail: bool,
    published: Vec<Txid>,
    abandoned: Vec<Txid>,
    unlock_calls: Vec<Vec<OutPoint>>,
}

/// In-memory Bitcoin Core stand-in. Confirmation counts, spendability and
/// publish outcomes are scripted per txid/outpoint; every mutating call is
/// recorded.
#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<ChainState>,
    unlock_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockChainClient {
    pub fn set_block_count(&self, block_count: BlockHeight) {
        self.state.lock().unwrap().block_count = block_count;
    }

    pub fn set_confirmations(&self, txid: Txid, confirmations: Option<u32>) {
        self.state
            .lock()
            .unwrap()
            .confirmations
            .insert(txid, confirmations);
    }

    /// Make the next `count` confirmation checks for `txid` fail before the
    /// scripted value is served again.
    pub fn fail_next_confirmation_checks(&self, txid: Txid, count: u32) {
        self.state
            .lock()
            .unwrap()
            .confirmation_failures
            .insert(txid, count);
    }

    pub fn set_spendable(&self, outpoint: OutPoint, excl: bool, incl: bool) {
        let mut state = self.state.lock().unwrap();
        state.spendable_excl.insert(outpoint, excl);
        state.spendable_incl.insert(outpoint, incl);
    }

    pub fn fail_probes(&self, fail: bool) {
        self.state.lock().unwrap().probes_fail = fail;
    }

    /// Fail every publish of `txid` with the given error message.
    pub fn fail_publish(&self, txid: Txid, message: String) {
        self.state
            .lock()
            .unwrap()
            .publish_failures
            .insert(txid, message);
    }

    /// Fail the next publish, whatever its txid.
    pub fn fail_next_publish(&self, message: String) {
        self.state.lock().unwrap().next_publish_failure = Some(message);
    }

    /// Block unlock calls until [`Self::open_unlock_gate`].
    pub fn gate_unlocks(&self) {
        *self.unlock_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn open_unlock_gate(&self) {
        if let Some(gate) = self.unlock_gate.lock().unwrap().as_ref() {
            gate.add_permits(100);
        }
    }

    pub fn published(&self) -> Vec<Txid> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn abandoned(&self) -> Vec<Txid> {
        self.state.lock().unwrap().abandoned.clone()
    }

    pub fn unlock_calls(&self) -> Vec<Vec<OutPoint>> {
        self.state.lock().unwrap().unlock_calls.clone()
    }

    /// All outpoints ever unlocked, across calls.
    pub fn unlocked(&self) -> Vec<OutPoint> {
        self.state
            .lock()
            .unwrap()
            .unlock_calls
            .iter()
            .flatten()
            .copied()
            .collect()
    }
}

#[async_trait]
impl BlockchainClient for MockChainClient {
    async fn publish_transaction(&self, tx: &Transaction) -> Result<(), ChainClientError> {
        let txid = tx.compute_txid();
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.next_publish_failure.take() {
            return Err(ChainClientError::Rpc(message));
        }
        if let Some(message) = state.publish_failures.get(&txid) {
            return Err(ChainClientError::Rpc(message.clone()));
        }
        state.published.push(txid);
        // Freshly accepted transactions sit in the mempool unless the test
        // scripts something else.
        state.confirmations.entry(txid).or_insert(Some(0));
        Ok(())
    }

    async fn get_tx_confirmations(&self, txid: Txid) -> Result<Option<u32>, ChainClientError> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.confirmation_failures.get_mut(&txid) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChainClientError::Rpc("connection reset".to_string()));
            }
        }
        Ok(state.confirmations.get(&txid).copied().unwrap_or(None))
    }

    async fn is_transaction_output_spendable(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<bool, ChainClientError> {
        let state = self.state.lock().unwrap();
        if state.probes_fail {
            return Err(ChainClientError::Rpc("connection reset".to_string()));
        }
        let map = if include_mempool {
            &state.spendable_incl
        } else {
            &state.spendable_excl
        };
        Ok(map.get(&outpoint).copied().unwrap_or(true))
    }

    async fn abandon_transaction(&self, txid: Txid) -> Result<(), ChainClientError> {
        self.state.lock().unwrap().abandoned.push(txid);
        Ok(())
    }

    async fn unlock_outpoints(&self, outpoints: &[OutPoint]) -> Result<(), ChainClientError> {
        let gate = self.unlock_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.state
            .lock()
            .unwrap()
            .unlock_calls
            .push(outpoints.to_vec());
        Ok(())
    }

    async fn get_block_count(&self) -> Result<BlockHeight, ChainClientError> {
        Ok(self.state.lock().unwrap().block_count)
    }
}

/// Fee estimator serving a flat default rate plus per-target overrides.
pub struct MockFeeEstimator {
    default_rate: Mutex<FeeRate>,
    rates: Mutex<HashMap<u16, FeeRate>>,
}

impl Default for MockFeeEstimator {
    fn default() -> Self {
        Self {
            default_rate: Mutex::new(FeeRate::from_sat_per_vb_unchecked(10)),
            rates: Mutex::new(HashMap::new()),
        }
    }
}

impl MockFeeEstimator {
    pub fn set_default(&self, rate: FeeRate) {
        *self.default_rate.lock().unwrap() = rate;
    }

    pub fn set_rate(&self, block_target: u16, rate: FeeRate) {
        self.rates.lock().unwrap().insert(block_target, rate);
    }
}

impl FeeEstimator for MockFeeEstimator {
    fn feerate_for_target(&self, block_target: u16) -> FeeRate {
        self.rates
            .lock()
            .unwrap()
            .get(&block_target)
            .copied()
            .unwrap_or(*self.default_rate.lock().unwrap())
    }
}

/// Pre-publisher that passes the request through, or fails when scripted.
#[derive(Default)]
pub struct MockPrePublisher {
    fail_with: Mutex<Option<String>>,
}

impl MockPrePublisher {
    pub fn fail_with(&self, reason: String) {
        *self.fail_with.lock().unwrap() = Some(reason);
    }
}

#[async_trait]
impl PrePublisher for MockPrePublisher {
    async fn verify_preconditions(
        &self,
        request: &PublishRequest,
    ) -> Result<TxWithWitnessData, String> {
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(reason);
        }
        Ok(TxWithWitnessData {
            tx: request.tx_info.tx.clone(),
            witness_data: request.witness_data.clone(),
        })
    }
}

/// Funder producing one funded transaction per call. Call `i` adds the
/// wallet input [`make_outpoint`]`(9_000 + i)`, so each attempt has a
/// distinct, predictable wallet input.
#[derive(Default)]
pub struct MockFunder {
    targets: Mutex<Vec<FeeRate>>,
    wallet_inputs: Mutex<Vec<Vec<OutPoint>>>,
    fail_with: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockFunder {
    pub fn call_count(&self) -> usize {
        self.targets.lock().unwrap().len()
    }

    pub fn targets(&self) -> Vec<FeeRate> {
        self.targets.lock().unwrap().clone()
    }

    /// The wallet inputs handed out so far, one entry per call.
    pub fn wallet_inputs_used(&self) -> Vec<Vec<OutPoint>> {
        self.wallet_inputs.lock().unwrap().clone()
    }

    pub fn fail_with(&self, reason: String) {
        *self.fail_with.lock().unwrap() = Some(reason);
    }

    /// Block the next funding call until [`Self::open_gate`].
    pub fn gate_next_call(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl TxFunder for MockFunder {
    async fn fund(
        &self,
        _tx: &TxWithWitnessData,
        request: &PublishRequest,
        target_feerate: FeeRate,
        _previous: Option<&FundedTx>,
    ) -> Result<FundedTx, String> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(reason);
        }

        let call_index = {
            let mut targets = self.targets.lock().unwrap();
            targets.push(target_feerate);
            targets.len() as u64 - 1
        };
        let wallet_input = make_outpoint(9_000 + call_index);
        self.wallet_inputs.lock().unwrap().push(vec![wallet_input]);

        let signed_tx = make_tx(&[request.input_outpoint, wallet_input], 42_000 + call_index);
        let fee = target_feerate
            .fee_vb(signed_tx.vsize() as u64)
            .unwrap_or(Amount::from_sat(u64::MAX));
        Ok(FundedTx {
            signed_tx,
            fee,
            feerate: target_feerate,
        })
    }
}

/// Time-lock monitor for transactions without locks.
pub struct NoTimeLocks;

#[async_trait]
impl TimeLockMonitor for NoTimeLocks {
    async fn wait_for_timelocks(&self, _tx: &Transaction) {}
}

/// Event sink that remembers everything it was given.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PublisherEvent>>,
}

impl RecordingEventSink {
    /// Short labels of the recorded events, in order.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| match event {
                PublisherEvent::TransactionPublished { .. } => "transaction published".to_string(),
                PublisherEvent::TransactionConfirmed { .. } => "transaction confirmed".to_string(),
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: PublisherEvent) {
        self.events.lock().unwrap().push(event);
    }
}
