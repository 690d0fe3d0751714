//! Per-transaction publisher: drives one replaceable transaction from
//! "should be broadcast" to either deeply confirmed or definitively
//! rejected, replacing it by fee when the deadline comes closer.
//!
//! The publisher is a single task processing one mailbox message at a time.
//! Helper work (precondition check, time locks, funding, cleanup) runs in
//! short-lived spawned tasks whose outcomes come back as mailbox messages,
//! so every state transition observes exactly one result. While a funding
//! attempt is in flight, other messages are stashed and replayed in arrival
//! order once the funding outcome is known.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::FeeRate;
use bitcoin::OutPoint;
use bitcoin::Txid;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::chain::BlockchainClient;
use crate::chain::FeeEstimator;
use crate::config_models::publisher_config::PublisherConfig;
use crate::fee_bumping;
use crate::funding::PrePublisher;
use crate::funding::TimeLockMonitor;
use crate::funding::TxFunder;
use crate::models::channel::AttemptId;
use crate::models::channel::MonitorToPublisher;
use crate::models::channel::PublishResult;
use crate::models::channel::PublisherMessage;
use crate::models::events::EventSink;
use crate::models::replaceable_tx::FundedTx;
use crate::models::replaceable_tx::PublishContext;
use crate::models::replaceable_tx::PublishRequest;
use crate::models::replaceable_tx::TxWithWitnessData;
use crate::models::tx_result::TxRejectedReason;
use crate::models::BlockHeight;
use crate::monitor_loop::MonitorLoopHandler;
use crate::PUBLISHER_CHANNEL_CAPACITY;

/// One broadcast attempt owned by the publisher: the funded transaction and
/// the monitor task watching it.
struct Attempt {
    id: AttemptId,
    funded: FundedTx,
    monitor: JoinHandle<()>,
}

impl Attempt {
    fn txid(&self) -> Txid {
        self.funded.txid()
    }

    /// `(txid, wallet inputs)` of this attempt, for the cleanup task.
    fn retirement(&self, input_outpoint: OutPoint) -> (Txid, Vec<OutPoint>) {
        (self.txid(), self.funded.wallet_inputs(input_outpoint))
    }
}

enum PublisherState {
    CheckingPreconditions,
    CheckingTimeLocks,
    Funding,
    /// One attempt in the mempool, watched by its monitor.
    Waiting { attempt: Attempt },
    /// The funder is building a replacement; `previous` stays in the
    /// mempool until the replacement is broadcast.
    FundingReplacement { previous: Attempt },
    /// Two conflicting attempts in flight; the first rejection decides the
    /// race.
    Publishing { previous: Attempt, bumped: Attempt },
    /// The race loser is being abandoned and unlocked.
    CleaningUp { winner: Attempt },
    /// Terminal result delivered; waiting for the caller's `Stop` before
    /// releasing whatever the retired attempts still hold.
    Stopping { retired: Vec<Attempt> },
    /// Cleanup task running; terminate on `UtxosUnlocked`.
    Unlocking,
    Stopped,
}

impl PublisherState {
    /// States that wait for exactly one message and stash everything else.
    fn is_stashing(&self) -> bool {
        matches!(
            self,
            PublisherState::Funding
                | PublisherState::FundingReplacement { .. }
                | PublisherState::CleaningUp { .. }
        )
    }
}

/// Random delay before a fee check. The jitter spreads the fee bumps of
/// many publishers over the window after a block instead of having them
/// all hit the estimator and the mempool at once.
fn jitter_delay(max: Duration) -> Duration {
    let max_ms = (max.as_millis() as u64).max(1);
    Duration::from_millis(rand::thread_rng().gen_range(1..=max_ms))
}

/// The immutable part of a publisher: its collaborators and the request it
/// was created for.
pub struct PublisherLoopHandler {
    config: PublisherConfig,
    chain_client: Arc<dyn BlockchainClient>,
    fee_estimator: Arc<dyn FeeEstimator>,
    pre_publisher: Arc<dyn PrePublisher>,
    funder: Arc<dyn TxFunder>,
    timelock_monitor: Arc<dyn TimeLockMonitor>,
    event_sink: Arc<dyn EventSink>,
    block_tx: broadcast::Sender<BlockHeight>,
    context: PublishContext,
    request: PublishRequest,
}

/// The mutable part of a publisher.
struct MutablePublisherLoopState {
    mailbox_tx: mpsc::Sender<PublisherMessage>,
    reply_to: Option<oneshot::Sender<PublishResult>>,
    stash: VecDeque<PublisherMessage>,
    fee_check_timer: Option<JoinHandle<()>>,
    child_tasks: Vec<JoinHandle<()>>,
    /// Set once preconditions pass; funding always starts from this.
    verified_tx: Option<TxWithWitnessData>,
    next_attempt_id: u64,
}

impl MutablePublisherLoopState {
    fn new(
        mailbox_tx: mpsc::Sender<PublisherMessage>,
        reply_to: oneshot::Sender<PublishResult>,
    ) -> Self {
        Self {
            mailbox_tx,
            reply_to: Some(reply_to),
            stash: VecDeque::new(),
            fee_check_timer: None,
            child_tasks: Vec::new(),
            verified_tx: None,
            next_attempt_id: 0,
        }
    }
}

/// Handle held by the caller of [`PublisherLoopHandler::spawn`].
pub struct PublisherHandle {
    mailbox_tx: mpsc::Sender<PublisherMessage>,
    join: JoinHandle<()>,
}

impl PublisherHandle {
    /// Ask the publisher to stop. After a terminal result this releases the
    /// retired attempts' UTXOs; before one it tears the publisher down
    /// without a result. Repeated stops are no-ops.
    pub async fn stop(&self) {
        let _ = self.mailbox_tx.send(PublisherMessage::Stop).await;
    }

    /// Wait until the publisher has terminated, cleanup included.
    pub async fn join(self) {
        let _ = self.join.await;
    }

    #[cfg(test)]
    pub(crate) fn mailbox(&self) -> mpsc::Sender<PublisherMessage> {
        self.mailbox_tx.clone()
    }
}

impl PublisherLoopHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PublisherConfig,
        chain_client: Arc<dyn BlockchainClient>,
        fee_estimator: Arc<dyn FeeEstimator>,
        pre_publisher: Arc<dyn PrePublisher>,
        funder: Arc<dyn TxFunder>,
        timelock_monitor: Arc<dyn TimeLockMonitor>,
        event_sink: Arc<dyn EventSink>,
        block_tx: broadcast::Sender<BlockHeight>,
        context: PublishContext,
        request: PublishRequest,
    ) -> Self {
        Self {
            config,
            chain_client,
            fee_estimator,
            pre_publisher,
            funder,
            timelock_monitor,
            event_sink,
            block_tx,
            context,
            request,
        }
    }

    /// Start the publisher. The terminal outcome is delivered through
    /// `reply_to` exactly once; afterwards the caller is expected to send
    /// `Stop` to let the publisher release retired UTXOs and terminate.
    pub fn spawn(self, reply_to: oneshot::Sender<PublishResult>) -> PublisherHandle {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(PUBLISHER_CHANNEL_CAPACITY);
        let loop_mailbox_tx = mailbox_tx.clone();
        let join =
            tokio::spawn(async move { self.run(mailbox_rx, loop_mailbox_tx, reply_to).await });
        PublisherHandle { mailbox_tx, join }
    }

    async fn run(
        self,
        mut mailbox_rx: mpsc::Receiver<PublisherMessage>,
        mailbox_tx: mpsc::Sender<PublisherMessage>,
        reply_to: oneshot::Sender<PublishResult>,
    ) {
        let mut loop_state = MutablePublisherLoopState::new(mailbox_tx, reply_to);
        info!(
            publish_id = self.context.publish_id,
            desc = %self.context.tx_desc,
            txid = %self.request.tx_info.tx.compute_txid(),
            confirm_before = self.request.tx_info.confirm_before,
            "starting replaceable transaction publisher"
        );
        self.spawn_precondition_check(&mut loop_state);

        let mut state = PublisherState::CheckingPreconditions;
        while let Some(message) = mailbox_rx.recv().await {
            state = self.handle_message(state, message, &mut loop_state).await;
            // Replay stashed messages in arrival order until a state that
            // stashes again (or termination) is reached.
            while !state.is_stashing() && !matches!(state, PublisherState::Stopped) {
                match loop_state.stash.pop_front() {
                    Some(stashed) => {
                        state = self.handle_message(state, stashed, &mut loop_state).await;
                    }
                    None => break,
                }
            }
            loop_state.child_tasks.retain(|task| !task.is_finished());
            if matches!(state, PublisherState::Stopped) {
                break;
            }
        }

        self.cancel_fee_check_timer(&mut loop_state);
        for task in loop_state.child_tasks {
            task.abort();
        }
        debug!(publish_id = self.context.publish_id, "publisher stopped");
    }

    async fn handle_message(
        &self,
        state: PublisherState,
        message: PublisherMessage,
        loop_state: &mut MutablePublisherLoopState,
    ) -> PublisherState {
        match state {
            PublisherState::CheckingPreconditions => match message {
                PublisherMessage::Preconditions(Ok(verified)) => {
                    debug!(
                        publish_id = self.context.publish_id,
                        "preconditions ok, waiting for time locks"
                    );
                    self.spawn_timelock_wait(loop_state, &verified);
                    loop_state.verified_tx = Some(verified);
                    PublisherState::CheckingTimeLocks
                }
                PublisherMessage::Preconditions(Err(reason)) => {
                    info!(
                        publish_id = self.context.publish_id,
                        desc = %self.context.tx_desc,
                        "preconditions failed: {reason}"
                    );
                    self.send_result(
                        loop_state,
                        self.rejected(TxRejectedReason::PreconditionsFailed(reason)),
                    );
                    PublisherState::Stopping { retired: vec![] }
                }
                PublisherMessage::Stop => self.begin_unlock(loop_state, vec![]),
                other => self.ignore_in(
                    other,
                    "checking preconditions",
                    PublisherState::CheckingPreconditions,
                ),
            },

            PublisherState::CheckingTimeLocks => match message {
                PublisherMessage::TimeLocksOk => {
                    debug!(
                        publish_id = self.context.publish_id,
                        "time locks satisfied, funding"
                    );
                    self.spawn_funding(loop_state, None, None);
                    PublisherState::Funding
                }
                PublisherMessage::Stop => self.begin_unlock(loop_state, vec![]),
                other => self.ignore_in(
                    other,
                    "checking time locks",
                    PublisherState::CheckingTimeLocks,
                ),
            },

            PublisherState::Funding => match message {
                PublisherMessage::Funding(Ok(funded)) => {
                    info!(
                        publish_id = self.context.publish_id,
                        txid = %funded.txid(),
                        feerate = funded.feerate.to_sat_per_kwu(),
                        fee_sat = funded.fee.to_sat(),
                        "funded, publishing"
                    );
                    let attempt = self.start_attempt(loop_state, funded);
                    PublisherState::Waiting { attempt }
                }
                PublisherMessage::Funding(Err(reason)) => {
                    warn!(
                        publish_id = self.context.publish_id,
                        desc = %self.context.tx_desc,
                        "funding failed: {reason}"
                    );
                    self.send_result(
                        loop_state,
                        self.rejected(TxRejectedReason::FundingFailed(reason)),
                    );
                    PublisherState::Stopping { retired: vec![] }
                }
                other => {
                    self.stash_message(loop_state, other);
                    PublisherState::Funding
                }
            },

            PublisherState::Waiting { attempt } => {
                self.handle_waiting(attempt, message, loop_state).await
            }

            PublisherState::FundingReplacement { previous } => match message {
                PublisherMessage::Funding(Ok(funded)) => {
                    info!(
                        publish_id = self.context.publish_id,
                        previous_txid = %previous.txid(),
                        bumped_txid = %funded.txid(),
                        feerate = funded.feerate.to_sat_per_kwu(),
                        "replacement funded, racing both attempts"
                    );
                    let bumped = self.start_attempt(loop_state, funded);
                    PublisherState::Publishing { previous, bumped }
                }
                PublisherMessage::Funding(Err(reason)) => {
                    warn!(
                        publish_id = self.context.publish_id,
                        txid = %previous.txid(),
                        "replacement funding failed, keeping the previous attempt: {reason}"
                    );
                    PublisherState::Waiting { attempt: previous }
                }
                other => {
                    self.stash_message(loop_state, other);
                    PublisherState::FundingReplacement { previous }
                }
            },

            PublisherState::Publishing { previous, bumped } => {
                self.handle_publishing(previous, bumped, message, loop_state)
                    .await
            }

            PublisherState::CleaningUp { winner } => match message {
                PublisherMessage::UtxosUnlocked => {
                    debug!(
                        publish_id = self.context.publish_id,
                        txid = %winner.txid(),
                        "race loser cleaned up"
                    );
                    PublisherState::Waiting { attempt: winner }
                }
                other => {
                    self.stash_message(loop_state, other);
                    PublisherState::CleaningUp { winner }
                }
            },

            PublisherState::Stopping { retired } => match message {
                PublisherMessage::Stop => self.begin_unlock(loop_state, retired),
                other => self.ignore_in(other, "stopping", PublisherState::Stopping { retired }),
            },

            PublisherState::Unlocking => match message {
                PublisherMessage::UtxosUnlocked => PublisherState::Stopped,
                PublisherMessage::Stop => {
                    debug!(
                        publish_id = self.context.publish_id,
                        "already stopping, ignoring repeated stop"
                    );
                    PublisherState::Unlocking
                }
                other => self.ignore_in(other, "unlocking", PublisherState::Unlocking),
            },

            PublisherState::Stopped => PublisherState::Stopped,
        }
    }

    async fn handle_waiting(
        &self,
        attempt: Attempt,
        message: PublisherMessage,
        loop_state: &mut MutablePublisherLoopState,
    ) -> PublisherState {
        match message {
            PublisherMessage::Monitor {
                attempt: reported,
                result,
            } if reported == attempt.id => match result {
                MonitorToPublisher::TxInMempool { block_height, .. } => {
                    self.arm_fee_check_timer(loop_state, block_height);
                    PublisherState::Waiting { attempt }
                }
                MonitorToPublisher::TxRecentlyConfirmed {
                    confirmations,
                    txid,
                } => {
                    debug!(
                        publish_id = self.context.publish_id,
                        %txid,
                        confirmations,
                        "confirmed, no more fee bumps"
                    );
                    self.cancel_fee_check_timer(loop_state);
                    PublisherState::Waiting { attempt }
                }
                MonitorToPublisher::TxDeeplyBuried { tx } => {
                    self.send_result(
                        loop_state,
                        PublishResult::TxConfirmed {
                            request: self.request.clone(),
                            tx,
                        },
                    );
                    // The confirmed attempt's inputs are spent on chain;
                    // there is nothing left to abandon or unlock.
                    PublisherState::Stopping { retired: vec![] }
                }
                MonitorToPublisher::TxRejected { txid, reason } => {
                    info!(
                        publish_id = self.context.publish_id,
                        %txid,
                        %reason,
                        "attempt rejected"
                    );
                    self.cancel_fee_check_timer(loop_state);
                    self.send_result(loop_state, self.rejected(reason));
                    PublisherState::Stopping {
                        retired: vec![attempt],
                    }
                }
            },
            PublisherMessage::Monitor {
                attempt: reported,
                result,
            } => {
                debug!(
                    publish_id = self.context.publish_id,
                    %reported,
                    "ignoring {} from a retired attempt",
                    result.get_type()
                );
                PublisherState::Waiting { attempt }
            }
            PublisherMessage::CheckFee { block_height } => {
                let remaining = self
                    .request
                    .tx_info
                    .confirm_before
                    .saturating_sub(block_height);
                let current = self
                    .fee_estimator
                    .feerate_for_target(fee_bumping::confirmation_target(remaining));
                match fee_bumping::bump_decision(remaining, current, attempt.funded.feerate) {
                    None => {
                        debug!(
                            publish_id = self.context.publish_id,
                            remaining_blocks = remaining,
                            estimate = current.to_sat_per_kwu(),
                            feerate = attempt.funded.feerate.to_sat_per_kwu(),
                            "feerate still adequate, not bumping"
                        );
                        PublisherState::Waiting { attempt }
                    }
                    Some(target) => {
                        info!(
                            publish_id = self.context.publish_id,
                            txid = %attempt.txid(),
                            remaining_blocks = remaining,
                            target_feerate = target.to_sat_per_kwu(),
                            "bumping fee"
                        );
                        self.cancel_fee_check_timer(loop_state);
                        self.spawn_funding(loop_state, Some(attempt.funded.clone()), Some(target));
                        PublisherState::FundingReplacement { previous: attempt }
                    }
                }
            }
            PublisherMessage::Stop => self.begin_unlock(loop_state, vec![attempt]),
            other => self.ignore_in(other, "waiting", PublisherState::Waiting { attempt }),
        }
    }

    async fn handle_publishing(
        &self,
        previous: Attempt,
        bumped: Attempt,
        message: PublisherMessage,
        loop_state: &mut MutablePublisherLoopState,
    ) -> PublisherState {
        match message {
            PublisherMessage::Monitor {
                attempt: reported,
                result,
            } => {
                if reported != previous.id && reported != bumped.id {
                    debug!(
                        publish_id = self.context.publish_id,
                        %reported,
                        "ignoring {} from an unknown attempt",
                        result.get_type()
                    );
                    return PublisherState::Publishing { previous, bumped };
                }
                match result {
                    result @ (MonitorToPublisher::TxInMempool { .. }
                    | MonitorToPublisher::TxRecentlyConfirmed { .. }) => {
                        // The report may predate the monitor learning about
                        // the replacement; look at it again once the race
                        // has had time to settle instead of bumping on
                        // stale state.
                        self.redeliver_later(loop_state, reported, result);
                        PublisherState::Publishing { previous, bumped }
                    }
                    MonitorToPublisher::TxRejected { txid, reason } => {
                        let (loser, winner) = if reported == bumped.id {
                            (bumped, previous)
                        } else {
                            (previous, bumped)
                        };
                        info!(
                            publish_id = self.context.publish_id,
                            loser = %txid,
                            winner = %winner.txid(),
                            %reason,
                            "replacement race decided"
                        );
                        loser.monitor.abort();
                        let survivor_inputs = winner
                            .funded
                            .signed_tx
                            .input
                            .iter()
                            .map(|txin| txin.previous_output)
                            .collect();
                        self.spawn_cleanup(
                            loop_state,
                            vec![loser.retirement(self.request.input_outpoint)],
                            survivor_inputs,
                        );
                        PublisherState::CleaningUp { winner }
                    }
                    MonitorToPublisher::TxDeeplyBuried { tx } => {
                        // Either attempt reaching min depth before any
                        // rejection would require the race to go unnoticed
                        // for the full confirmation depth.
                        warn!(
                            publish_id = self.context.publish_id,
                            txid = %tx.compute_txid(),
                            "deeply buried while the replacement race was undecided"
                        );
                        let retired = if reported == bumped.id {
                            previous
                        } else {
                            bumped
                        };
                        retired.monitor.abort();
                        self.send_result(
                            loop_state,
                            PublishResult::TxConfirmed {
                                request: self.request.clone(),
                                tx,
                            },
                        );
                        PublisherState::Stopping {
                            retired: vec![retired],
                        }
                    }
                }
            }
            PublisherMessage::CheckFee { .. } => {
                // Armed before the replacement started; the race outcome
                // decides the next feerate, not this stale check.
                debug!(
                    publish_id = self.context.publish_id,
                    "ignoring fee check while a replacement race is running"
                );
                PublisherState::Publishing { previous, bumped }
            }
            PublisherMessage::Stop => self.begin_unlock(loop_state, vec![previous, bumped]),
            other => self.ignore_in(
                other,
                "publishing",
                PublisherState::Publishing { previous, bumped },
            ),
        }
    }

    /// Spawn the monitor for a fresh broadcast attempt.
    fn start_attempt(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        funded: FundedTx,
    ) -> Attempt {
        let id = AttemptId(loop_state.next_attempt_id);
        loop_state.next_attempt_id += 1;
        let monitor = MonitorLoopHandler::new(
            self.chain_client.clone(),
            self.event_sink.clone(),
            loop_state.mailbox_tx.clone(),
            id,
            self.context.clone(),
            self.config.min_depth_blocks,
        )
        .spawn(
            funded.clone(),
            self.request.input_outpoint,
            self.block_tx.subscribe(),
        );
        Attempt {
            id,
            funded,
            monitor,
        }
    }

    fn spawn_precondition_check(&self, loop_state: &mut MutablePublisherLoopState) {
        let pre_publisher = self.pre_publisher.clone();
        let request = self.request.clone();
        let mailbox = loop_state.mailbox_tx.clone();
        loop_state.child_tasks.push(tokio::spawn(async move {
            let result = pre_publisher.verify_preconditions(&request).await;
            let _ = mailbox.send(PublisherMessage::Preconditions(result)).await;
        }));
    }

    fn spawn_timelock_wait(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        verified: &TxWithWitnessData,
    ) {
        let timelock_monitor = self.timelock_monitor.clone();
        let tx = verified.tx.clone();
        let mailbox = loop_state.mailbox_tx.clone();
        loop_state.child_tasks.push(tokio::spawn(async move {
            timelock_monitor.wait_for_timelocks(&tx).await;
            let _ = mailbox.send(PublisherMessage::TimeLocksOk).await;
        }));
    }

    /// Run the funder in a task of its own. Without an explicit target the
    /// task derives one from the node's current height and the deadline;
    /// replacements get the target the bump decision picked.
    fn spawn_funding(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        previous: Option<FundedTx>,
        target: Option<FeeRate>,
    ) {
        let verified = loop_state
            .verified_tx
            .clone()
            .expect("preconditions must have run before funding");
        let chain_client = self.chain_client.clone();
        let fee_estimator = self.fee_estimator.clone();
        let funder = self.funder.clone();
        let request = self.request.clone();
        let mailbox = loop_state.mailbox_tx.clone();
        loop_state.child_tasks.push(tokio::spawn(async move {
            let target = match target {
                Some(target) => Ok(target),
                None => chain_client
                    .get_block_count()
                    .await
                    .map(|height| {
                        let remaining = request.tx_info.confirm_before.saturating_sub(height);
                        fee_estimator
                            .feerate_for_target(fee_bumping::confirmation_target(remaining))
                    })
                    .map_err(|err| format!("could not query block count: {err}")),
            };
            let result = match target {
                Ok(target) => {
                    funder
                        .fund(&verified, &request, target, previous.as_ref())
                        .await
                }
                Err(err) => Err(err),
            };
            let _ = mailbox.send(PublisherMessage::Funding(result)).await;
        }));
    }

    /// Abandon and unlock the given retired attempts in a spawned task,
    /// keeping every input of the surviving attempt locked. Reports back
    /// with `UtxosUnlocked`.
    fn spawn_cleanup(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        retired: Vec<(Txid, Vec<OutPoint>)>,
        survivor_inputs: Vec<OutPoint>,
    ) {
        let chain_client = self.chain_client.clone();
        let mailbox = loop_state.mailbox_tx.clone();
        let publish_id = self.context.publish_id;
        loop_state.child_tasks.push(tokio::spawn(async move {
            for (txid, wallet_inputs) in retired {
                if let Err(err) = chain_client.abandon_transaction(txid).await {
                    debug!(publish_id, %txid, "abandon failed (ignored): {err}");
                }
                let to_unlock: Vec<OutPoint> = wallet_inputs
                    .into_iter()
                    .filter(|outpoint| !survivor_inputs.contains(outpoint))
                    .collect();
                if !to_unlock.is_empty() {
                    if let Err(err) = chain_client.unlock_outpoints(&to_unlock).await {
                        warn!(
                            publish_id,
                            %txid,
                            "could not unlock {} outpoints: {err}",
                            to_unlock.len()
                        );
                    }
                }
            }
            let _ = mailbox.send(PublisherMessage::UtxosUnlocked).await;
        }));
    }

    /// Tear down every live attempt: cancel timers and monitors, then
    /// abandon and unlock in the background.
    fn begin_unlock(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        attempts: Vec<Attempt>,
    ) -> PublisherState {
        info!(
            publish_id = self.context.publish_id,
            attempts = attempts.len(),
            "stopping, releasing wallet UTXOs"
        );
        self.cancel_fee_check_timer(loop_state);
        let mut retired = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            attempt.monitor.abort();
            retired.push(attempt.retirement(self.request.input_outpoint));
        }
        self.spawn_cleanup(loop_state, retired, Vec::new());
        PublisherState::Unlocking
    }

    /// (Re-)arm the single-shot fee-check timer with a fresh jitter; an
    /// already armed timer is replaced so at most one check is in flight.
    fn arm_fee_check_timer(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        block_height: BlockHeight,
    ) {
        self.cancel_fee_check_timer(loop_state);
        let delay = jitter_delay(self.config.max_tx_publish_retry_delay);
        debug!(
            publish_id = self.context.publish_id,
            block_height,
            delay_ms = delay.as_millis() as u64,
            "scheduling fee check"
        );
        let mailbox = loop_state.mailbox_tx.clone();
        loop_state.fee_check_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = mailbox
                .send(PublisherMessage::CheckFee { block_height })
                .await;
        }));
    }

    fn cancel_fee_check_timer(&self, loop_state: &mut MutablePublisherLoopState) {
        if let Some(timer) = loop_state.fee_check_timer.take() {
            timer.abort();
        }
    }

    /// Park an intermediate monitor report for a moment and look at it
    /// again, in case it was produced before the monitor saw the
    /// replacement.
    fn redeliver_later(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        attempt: AttemptId,
        result: MonitorToPublisher,
    ) {
        debug!(
            publish_id = self.context.publish_id,
            %attempt,
            "re-delivering {} after the race settles",
            result.get_type()
        );
        let delay = self.config.intermediate_redelivery_delay;
        let mailbox = loop_state.mailbox_tx.clone();
        loop_state.child_tasks.push(tokio::spawn(async move {
            sleep(delay).await;
            let _ = mailbox
                .send(PublisherMessage::Monitor { attempt, result })
                .await;
        }));
    }

    fn stash_message(
        &self,
        loop_state: &mut MutablePublisherLoopState,
        message: PublisherMessage,
    ) {
        if loop_state.stash.len() >= PUBLISHER_CHANNEL_CAPACITY {
            warn!(
                publish_id = self.context.publish_id,
                "stash full, dropping {}",
                message.get_type()
            );
            return;
        }
        loop_state.stash.push_back(message);
    }

    fn send_result(&self, loop_state: &mut MutablePublisherLoopState, result: PublishResult) {
        match &result {
            PublishResult::TxConfirmed { tx, .. } => info!(
                publish_id = self.context.publish_id,
                desc = %self.context.tx_desc,
                txid = %tx.compute_txid(),
                "transaction confirmed"
            ),
            PublishResult::TxRejected { reason, .. } => info!(
                publish_id = self.context.publish_id,
                desc = %self.context.tx_desc,
                %reason,
                "transaction rejected"
            ),
        }
        match loop_state.reply_to.take() {
            Some(reply_to) => {
                if reply_to.send(result).is_err() {
                    debug!(
                        publish_id = self.context.publish_id,
                        "caller gone before the terminal result"
                    );
                }
            }
            None => warn!(
                publish_id = self.context.publish_id,
                "terminal result already delivered, dropping a second one"
            ),
        }
    }

    fn rejected(&self, reason: TxRejectedReason) -> PublishResult {
        PublishResult::TxRejected {
            publish_id: self.context.publish_id,
            request: self.request.clone(),
            reason,
        }
    }

    fn ignore_in(
        &self,
        message: PublisherMessage,
        while_doing: &str,
        state: PublisherState,
    ) -> PublisherState {
        debug!(
            publish_id = self.context.publish_id,
            "ignoring {} while {while_doing}",
            message.get_type()
        );
        state
    }
}
