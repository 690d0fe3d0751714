//! Tracks one broadcast attempt: publishes a signed transaction and reports
//! mempool sightings, confirmations and rejections to the publisher that
//! owns the attempt. Exactly one final report is sent, then the task ends.

use std::sync::Arc;

use bitcoin::OutPoint;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::chain::classify_publish_error;
use crate::chain::BlockchainClient;
use crate::chain::ChainClientError;
use crate::chain::PublishErrorClass;
use crate::models::channel::AttemptId;
use crate::models::channel::MonitorToPublisher;
use crate::models::channel::PublisherMessage;
use crate::models::events::EventSink;
use crate::models::events::PublisherEvent;
use crate::models::replaceable_tx::FundedTx;
use crate::models::replaceable_tx::PublishContext;
use crate::models::tx_result::InputStatus;
use crate::models::tx_result::TxRejectedReason;
use crate::models::BlockHeight;

/// One monitor per broadcast attempt. Owns nothing but its report channel;
/// the publisher aborts the task when the attempt loses a replace-by-fee
/// race.
pub struct MonitorLoopHandler {
    chain_client: Arc<dyn BlockchainClient>,
    event_sink: Arc<dyn EventSink>,
    to_publisher: mpsc::Sender<PublisherMessage>,
    attempt: AttemptId,
    context: PublishContext,
    min_depth_blocks: u32,
}

impl MonitorLoopHandler {
    pub fn new(
        chain_client: Arc<dyn BlockchainClient>,
        event_sink: Arc<dyn EventSink>,
        to_publisher: mpsc::Sender<PublisherMessage>,
        attempt: AttemptId,
        context: PublishContext,
        min_depth_blocks: u32,
    ) -> Self {
        Self {
            chain_client,
            event_sink,
            to_publisher,
            attempt,
            context,
            min_depth_blocks,
        }
    }

    /// Publish `funded` and watch it until it is deeply buried or rejected.
    /// `input_outpoint` is the claimed contract input, probed when the
    /// transaction goes missing.
    pub fn spawn(
        self,
        funded: FundedTx,
        input_outpoint: OutPoint,
        block_rx: broadcast::Receiver<BlockHeight>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(funded, input_outpoint, block_rx).await })
    }

    async fn run(
        self,
        funded: FundedTx,
        input_outpoint: OutPoint,
        mut block_rx: broadcast::Receiver<BlockHeight>,
    ) {
        let txid = funded.txid();

        match self.chain_client.publish_transaction(&funded.signed_tx).await {
            Ok(()) => {
                info!(
                    publish_id = self.context.publish_id,
                    %txid,
                    desc = %self.context.tx_desc,
                    fee_sat = funded.fee.to_sat(),
                    "transaction published"
                );
                self.event_sink.emit(PublisherEvent::TransactionPublished {
                    channel_id: self.context.channel_id.clone(),
                    remote_node_id: self.context.remote_node_id.clone(),
                    tx: funded.signed_tx.clone(),
                    fee: funded.fee,
                    desc: self.context.tx_desc.clone(),
                });
            }
            Err(ChainClientError::Rpc(message)) => {
                let reason = match classify_publish_error(&message) {
                    PublishErrorClass::RejectedReplacement => {
                        TxRejectedReason::ConflictingTxUnconfirmed
                    }
                    PublishErrorClass::MissingOrSpentInputs => {
                        check_input_status(self.chain_client.as_ref(), input_outpoint).await
                    }
                    PublishErrorClass::Other => {
                        warn!(
                            publish_id = self.context.publish_id,
                            %txid,
                            "publish failed: {message}"
                        );
                        TxRejectedReason::UnknownTxFailure
                    }
                };
                self.send(MonitorToPublisher::TxRejected { txid, reason })
                    .await;
                return;
            }
        }

        loop {
            let block_height = match block_rx.recv().await {
                Ok(block_height) => block_height,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Only the most recent height matters; the next recv
                    // returns it.
                    debug!(
                        publish_id = self.context.publish_id,
                        "block feed lagged by {skipped} heights"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(
                        publish_id = self.context.publish_id,
                        %txid,
                        "block feed closed, monitor exiting"
                    );
                    return;
                }
            };

            match self.chain_client.get_tx_confirmations(txid).await {
                Err(err) => {
                    warn!(
                        publish_id = self.context.publish_id,
                        %txid,
                        "confirmation check failed, retrying at next block: {err}"
                    );
                }
                Ok(Some(0)) => {
                    self.send(MonitorToPublisher::TxInMempool { txid, block_height })
                        .await;
                }
                Ok(Some(confirmations)) if confirmations >= self.min_depth_blocks => {
                    info!(
                        publish_id = self.context.publish_id,
                        %txid,
                        confirmations,
                        desc = %self.context.tx_desc,
                        "transaction confirmed"
                    );
                    self.event_sink.emit(PublisherEvent::TransactionConfirmed {
                        channel_id: self.context.channel_id.clone(),
                        remote_node_id: self.context.remote_node_id.clone(),
                        tx: funded.signed_tx.clone(),
                    });
                    self.send(MonitorToPublisher::TxDeeplyBuried {
                        tx: funded.signed_tx.clone(),
                    })
                    .await;
                    return;
                }
                Ok(Some(confirmations)) => {
                    self.send(MonitorToPublisher::TxRecentlyConfirmed {
                        txid,
                        confirmations,
                    })
                    .await;
                }
                Ok(None) => {
                    // Evicted. The input tells us whether we lost to a
                    // conflict or the wallet pulled an input from under us.
                    let reason =
                        check_input_status(self.chain_client.as_ref(), input_outpoint).await;
                    self.send(MonitorToPublisher::TxRejected { txid, reason })
                        .await;
                    return;
                }
            }
        }
    }

    async fn send(&self, result: MonitorToPublisher) {
        let message = PublisherMessage::Monitor {
            attempt: self.attempt,
            result,
        };
        if self.to_publisher.send(message).await.is_err() {
            debug!(
                publish_id = self.context.publish_id,
                "publisher gone, dropping monitor report"
            );
        }
    }
}

/// Probe the claimed input after its spending transaction went missing and
/// translate the outcome into a rejection reason.
pub(crate) async fn check_input_status(
    chain_client: &dyn BlockchainClient,
    outpoint: OutPoint,
) -> TxRejectedReason {
    let (parent_confirmations, spendable_excl, spendable_incl) = tokio::join!(
        chain_client.get_tx_confirmations(outpoint.txid),
        chain_client.is_transaction_output_spendable(outpoint, false),
        chain_client.is_transaction_output_spendable(outpoint, true),
    );
    match (parent_confirmations, spendable_excl, spendable_incl) {
        (Ok(parent_confirmations), Ok(spendable_excl), Ok(spendable_incl)) => {
            let status = InputStatus::derive(parent_confirmations, spendable_excl, spendable_incl);
            if status.spent_confirmed {
                TxRejectedReason::ConflictingTxConfirmed
            } else if status.spent_unconfirmed {
                TxRejectedReason::ConflictingTxUnconfirmed
            } else {
                TxRejectedReason::WalletInputGone
            }
        }
        _ => TxRejectedReason::TxSkipped {
            retry_next_block: true,
        },
    }
}
