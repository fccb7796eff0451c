//! Settlement finalization after a dispute ruling.
//!
//! Exactly one party may broadcast the payout transaction. If both sides
//! signed and published independently the network would see two different
//! zero-confirmation spends of the same escrow output (one signed by
//! arbitrator+buyer, one by arbitrator+seller). The coordinator resolves
//! who the effective publisher is, and the non-publisher only ever imports
//! the transaction it is sent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::EngineCommand;
use crate::error::DisputeError;
use crate::events::{DisputeEvent, EventBus};
use crate::logging::{sanitize_trade_id, sanitize_tx_id};
use crate::messages::DisputeMessage;
use crate::models::dispute::Dispute;
use crate::models::dispute_result::{DisputeResult, Winner};
use crate::models::keys::PubKeyRing;
use crate::traits::{MailboxTransport, PayoutSignRequest, SignedTransaction, SigningWallet, TradeLifecycle};

pub struct PayoutCoordinator {
    wallet: Arc<dyn SigningWallet>,
    trades: Arc<dyn TradeLifecycle>,
    transport: Arc<dyn MailboxTransport>,
    events: EventBus,
    /// Trades with a sign-and-broadcast currently in flight. Guards against
    /// a duplicated result message racing itself into two wallet requests.
    in_flight: Mutex<HashSet<String>>,
}

impl PayoutCoordinator {
    pub fn new(
        wallet: Arc<dyn SigningWallet>,
        trades: Arc<dyn TradeLifecycle>,
        transport: Arc<dyn MailboxTransport>,
        events: EventBus,
    ) -> Self {
        Self {
            wallet,
            trades,
            transport,
            events,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run the settlement decision off the engine task. The engine hands
    /// over an owned snapshot; the only mutation flows back as a
    /// [`EngineCommand::PayoutRecorded`].
    pub(crate) fn spawn_settlement(
        self: &Arc<Self>,
        dispute: Dispute,
        result: DisputeResult,
        own_ring: PubKeyRing,
        engine_tx: mpsc::Sender<EngineCommand>,
    ) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator
                .settle(dispute, result, own_ring, engine_tx)
                .await;
        });
    }

    async fn settle(
        &self,
        dispute: Dispute,
        result: DisputeResult,
        own_ring: PubKeyRing,
        engine_tx: mpsc::Sender<EngineCommand>,
    ) {
        let trade_id = dispute.trade_id().to_string();
        let is_buyer = dispute.contract().is_buyer(&own_ring);
        let publisher = result.effective_publisher();
        let local_publishes = (is_buyer && publisher == Winner::Buyer)
            || (!is_buyer && publisher == Winner::Seller);

        if !local_publishes {
            debug!(
                trade_id = %sanitize_trade_id(&trade_id),
                "not the effective publisher, awaiting peer's payout tx"
            );
            // Clean up a tangling trade record for bookkeeping symmetry.
            if dispute.is_closed() && self.trades.has_open_trade(&trade_id).await {
                self.trades.close_disputed_trade(&trade_id).await;
            }
            return;
        }

        {
            let mut guard = self.in_flight.lock().expect("in-flight lock poisoned");
            if !guard.insert(trade_id.clone()) {
                warn!(
                    trade_id = %sanitize_trade_id(&trade_id),
                    "payout already in flight for this trade, skipping"
                );
                return;
            }
        }

        if let Err(e) = self.publish(&dispute, &result, is_buyer, &engine_tx).await {
            // No automatic retry: the operator or the peer's own publish
            // attempt is the recovery path.
            error!(
                trade_id = %sanitize_trade_id(&trade_id),
                error = %e,
                "payout publish failed, dispute stays unpublished"
            );
        }

        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&trade_id);
    }

    async fn publish(
        &self,
        dispute: &Dispute,
        result: &DisputeResult,
        is_buyer: bool,
        engine_tx: &mpsc::Sender<EngineCommand>,
    ) -> Result<(), DisputeError> {
        let trade_id = dispute.trade_id();

        // A re-applied ruling for a dispute whose payout was already
        // broadcast and recorded must not produce a second transaction.
        if let Some(tx_id) = dispute.dispute_payout_tx_id() {
            info!(
                trade_id = %sanitize_trade_id(trade_id),
                tx_id = %sanitize_tx_id(tx_id),
                "payout tx already recorded for this dispute, nothing to publish"
            );
            return Ok(());
        }

        // A payout tx can already exist when normal trade completion raced
        // the dispute. Forward it instead of signing a second one.
        if let Some(existing) = self.trades.payout_tx_for(trade_id).await {
            warn!(
                trade_id = %sanitize_trade_id(trade_id),
                tx_id = %sanitize_tx_id(&existing.tx_id),
                "payout tx already known, forwarding instead of re-signing"
            );
            self.record_and_forward(dispute, existing, engine_tx).await;
            self.trades.close_disputed_trade(trade_id).await;
            return Ok(());
        }

        let deposit_tx = dispute
            .deposit_tx_serialized
            .clone()
            .ok_or_else(|| DisputeError::DepositTxMissing {
                trade_id: trade_id.to_string(),
            })?;

        let contract = dispute.contract();
        let own_multisig_pub_key = if is_buyer {
            contract.buyer_multisig_pub_key.clone()
        } else {
            contract.seller_multisig_pub_key.clone()
        };
        let request = PayoutSignRequest {
            trade_id: trade_id.to_string(),
            deposit_tx,
            arbitrator_signature: result.arbitrator_signature.clone(),
            arbitrator_pub_key: result.arbitrator_pub_key.clone(),
            buyer_payout_amount: result.buyer_payout_amount,
            seller_payout_amount: result.seller_payout_amount,
            buyer_payout_address: contract.buyer_payout_address.clone(),
            seller_payout_address: contract.seller_payout_address.clone(),
            own_multisig_pub_key,
            buyer_multisig_pub_key: contract.buyer_multisig_pub_key.clone(),
            seller_multisig_pub_key: contract.seller_multisig_pub_key.clone(),
        };

        let signed = self.wallet.co_sign_and_finalize_payout(request).await?;
        let tx_id = self
            .wallet
            .broadcast(&signed)
            .await
            .map_err(|e| DisputeError::BroadcastFailed(e.to_string()))?;
        info!(
            trade_id = %sanitize_trade_id(trade_id),
            tx_id = %sanitize_tx_id(&tx_id),
            "disputed payout tx broadcast"
        );

        let tx = SignedTransaction {
            tx_id,
            raw: signed.raw,
        };
        self.record_and_forward(dispute, tx, engine_tx).await;

        if self.trades.has_open_trade(trade_id).await {
            self.trades.close_disputed_trade(trade_id).await;
        } else if !self.trades.close_open_offer(trade_id).await {
            debug!(
                trade_id = %sanitize_trade_id(trade_id),
                "no open trade or offer left to close after payout"
            );
        }
        Ok(())
    }

    /// Record the tx id on the dispute (via the engine) and forward the
    /// transaction to the peer so they import instead of publishing.
    async fn record_and_forward(
        &self,
        dispute: &Dispute,
        tx: SignedTransaction,
        engine_tx: &mpsc::Sender<EngineCommand>,
    ) {
        let trade_id = dispute.trade_id().to_string();
        let _ = engine_tx
            .send(EngineCommand::PayoutRecorded {
                trade_id: trade_id.clone(),
                tx_id: tx.tx_id.clone(),
            })
            .await;

        let contract = dispute.contract();
        let peer_ring = contract.ring_of(!dispute.dispute_opener_is_buyer).clone();
        let peer_address = contract.address_of(!dispute.dispute_opener_is_buyer).clone();
        let message = DisputeMessage::PeerPublishedPayoutTx {
            transaction: tx.raw,
            trade_id: trade_id.clone(),
            sender_node_address: self.transport.own_address(),
            uid: Uuid::new_v4().to_string(),
        };
        match self
            .transport
            .send_encrypted(peer_address, peer_ring, message)
            .await
        {
            Ok(receipt) => info!(
                trade_id = %sanitize_trade_id(&trade_id),
                ?receipt,
                "peer notified of published payout tx"
            ),
            Err(e) => error!(
                trade_id = %sanitize_trade_id(&trade_id),
                error = %e,
                "failed to send payout tx to peer"
            ),
        }

        self.events.emit(DisputeEvent::PayoutPublished {
            trade_id,
            tx_id: tx.tx_id,
        });
    }
}
