//! The dispute protocol engine.
//!
//! A single task owns all mutable dispute state and processes commands from
//! one mailbox: decrypted inbound messages, local send requests, transport
//! acknowledgements and payout-coordinator callbacks. Handling one command
//! is atomic with respect to the store; nothing else mutates a dispute.
//!
//! Delivery is at-least-once and unordered, so every inbound handler is
//! idempotent and a message whose causal prerequisite is missing gets
//! exactly one delayed redelivery before it is declared stuck.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ArbitrationConfig;
use crate::error::DisputeError;
use crate::events::{DisputeEvent, EventBus};
use crate::logging::{sanitize_trade_id, sanitize_uid};
use crate::messages::DisputeMessage;
use crate::models::chat::{Attachment, ChatMessage};
use crate::models::dispute::Dispute;
use crate::models::dispute_result::DisputeResult;
use crate::models::keys::{NodeAddress, PubKeyRing};
use crate::payout::PayoutCoordinator;
use crate::retry::RetryScheduler;
use crate::store::DisputeStore;
use crate::traits::{
    DeliveryReceipt, DisputePersistence, MailboxTransport, SigningWallet, TradeLifecycle,
};

/// Commands processed by the engine task.
pub(crate) enum EngineCommand {
    /// A decrypted message from the transport.
    Inbound {
        message: DisputeMessage,
        from_mailbox: bool,
    },
    /// A message re-injected by the retry scheduler.
    Redeliver(DisputeMessage),
    /// The node finished bootstrapping; buffered messages can be applied.
    BootstrapComplete,
    OpenDispute {
        dispute: Dispute,
        reopen: bool,
        respond: oneshot::Sender<Result<(), DisputeError>>,
    },
    SendChat {
        trade_id: String,
        trader_id: i32,
        text: String,
        attachments: Vec<Attachment>,
        respond: oneshot::Sender<Result<ChatMessage, DisputeError>>,
    },
    SendResult {
        result: DisputeResult,
        summary: String,
        respond: oneshot::Sender<Result<(), DisputeError>>,
    },
    /// Transport acknowledgement for a tracked chat message.
    DeliveryOutcome {
        trade_id: String,
        chat_uid: String,
        outcome: Result<DeliveryReceipt, String>,
    },
    /// The payout coordinator broadcast (or forwarded) a payout tx.
    PayoutRecorded { trade_id: String, tx_id: String },
    Disputes {
        respond: oneshot::Sender<Vec<Dispute>>,
    },
}

/// Cloneable front to the engine task.
#[derive(Clone)]
pub struct DisputeEngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    events: EventBus,
}

impl DisputeEngineHandle {
    /// Hand a decrypted direct message to the engine.
    pub async fn deliver(&self, message: DisputeMessage) {
        let _ = self
            .tx
            .send(EngineCommand::Inbound {
                message,
                from_mailbox: false,
            })
            .await;
    }

    /// Hand a decrypted mailbox message to the engine; it is removed from
    /// the remote mailbox once dispatched.
    pub async fn deliver_from_mailbox(&self, message: DisputeMessage) {
        let _ = self
            .tx
            .send(EngineCommand::Inbound {
                message,
                from_mailbox: true,
            })
            .await;
    }

    /// Signal that the local node finished bootstrapping.
    pub async fn notify_bootstrapped(&self) {
        let _ = self.tx.send(EngineCommand::BootstrapComplete).await;
    }

    /// Open (or with `reopen`, re-send) a dispute with the arbitrator.
    /// Resolves once the open message arrived or was stored in the
    /// arbitrator's mailbox.
    pub async fn open_dispute(&self, dispute: Dispute, reopen: bool) -> Result<(), DisputeError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::OpenDispute {
                dispute,
                reopen,
                respond,
            })
            .await
            .map_err(|_| DisputeError::EngineUnavailable)?;
        rx.await.map_err(|_| DisputeError::EngineUnavailable)?
    }

    /// Send a chat message within the dispute identified by
    /// `(trade_id, trader_id)`. Only trader-to-arbitrator and
    /// arbitrator-to-trader routes exist.
    pub async fn send_chat_message(
        &self,
        trade_id: impl Into<String>,
        trader_id: i32,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<ChatMessage, DisputeError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::SendChat {
                trade_id: trade_id.into(),
                trader_id,
                text: text.into(),
                attachments,
                respond,
            })
            .await
            .map_err(|_| DisputeError::EngineUnavailable)?;
        rx.await.map_err(|_| DisputeError::EngineUnavailable)?
    }

    /// Arbitrator only: close the dispute with a binding ruling and send it
    /// to the trader.
    pub async fn send_dispute_result(
        &self,
        result: DisputeResult,
        summary: impl Into<String>,
    ) -> Result<(), DisputeError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::SendResult {
                result,
                summary: summary.into(),
                respond,
            })
            .await
            .map_err(|_| DisputeError::EngineUnavailable)?;
        rx.await.map_err(|_| DisputeError::EngineUnavailable)?
    }

    /// Snapshot of all stored disputes.
    pub async fn disputes(&self) -> Result<Vec<Dispute>, DisputeError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Disputes { respond })
            .await
            .map_err(|_| DisputeError::EngineUnavailable)?;
        rx.await.map_err(|_| DisputeError::EngineUnavailable)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisputeEvent> {
        self.events.subscribe()
    }
}

pub struct DisputeEngine {
    own_ring: PubKeyRing,
    config: ArbitrationConfig,
    store: DisputeStore,
    retries: RetryScheduler,
    transport: Arc<dyn MailboxTransport>,
    wallet: Arc<dyn SigningWallet>,
    trades: Arc<dyn TradeLifecycle>,
    payouts: Arc<PayoutCoordinator>,
    events: EventBus,
    cmd_tx: mpsc::Sender<EngineCommand>,
    /// Messages received before bootstrap completed.
    pending_until_bootstrap: Vec<(DisputeMessage, bool)>,
}

impl DisputeEngine {
    /// Load persisted disputes, reconcile duplicates and start the engine
    /// task. Must be called from within a tokio runtime.
    pub fn spawn(
        own_ring: PubKeyRing,
        config: ArbitrationConfig,
        transport: Arc<dyn MailboxTransport>,
        wallet: Arc<dyn SigningWallet>,
        trades: Arc<dyn TradeLifecycle>,
        persistence: Arc<dyn DisputePersistence>,
    ) -> Result<DisputeEngineHandle, DisputeError> {
        let store = DisputeStore::load(persistence)?;
        let events = EventBus::default();
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let payouts = Arc::new(PayoutCoordinator::new(
            wallet.clone(),
            trades.clone(),
            transport.clone(),
            events.clone(),
        ));
        let mut engine = DisputeEngine {
            own_ring,
            retries: RetryScheduler::new(config.max_pending_retries),
            config,
            store,
            transport,
            wallet,
            trades,
            payouts,
            events: events.clone(),
            cmd_tx: cmd_tx.clone(),
            pending_until_bootstrap: Vec::new(),
        };
        tokio::spawn(async move {
            engine.run(cmd_rx).await;
        });
        Ok(DisputeEngineHandle { tx: cmd_tx, events })
    }

    async fn run(&mut self, mut cmd_rx: mpsc::Receiver<EngineCommand>) {
        info!(disputes = self.store.len(), "dispute engine started");
        self.reconcile_duplicate_disputes().await;
        while let Some(cmd) = cmd_rx.recv().await {
            self.handle_command(cmd).await;
        }
        debug!("dispute engine stopped");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Inbound {
                message,
                from_mailbox,
            } => {
                if !self.transport.is_bootstrapped() {
                    self.pending_until_bootstrap.push((message, from_mailbox));
                    return;
                }
                self.drain_pending().await;
                self.apply_inbound(message, from_mailbox).await;
            }
            EngineCommand::Redeliver(message) => self.dispatch(message).await,
            EngineCommand::BootstrapComplete => self.drain_pending().await,
            EngineCommand::OpenDispute {
                dispute,
                reopen,
                respond,
            } => self.on_open_dispute(dispute, reopen, respond),
            EngineCommand::SendChat {
                trade_id,
                trader_id,
                text,
                attachments,
                respond,
            } => self.on_send_chat(trade_id, trader_id, text, attachments, respond),
            EngineCommand::SendResult {
                result,
                summary,
                respond,
            } => self.on_send_result(result, summary, respond),
            EngineCommand::DeliveryOutcome {
                trade_id,
                chat_uid,
                outcome,
            } => self.on_delivery_outcome(trade_id, chat_uid, outcome),
            EngineCommand::PayoutRecorded { trade_id, tx_id } => {
                self.on_payout_recorded(trade_id, tx_id)
            }
            EngineCommand::Disputes { respond } => {
                let _ = respond.send(self.store.all().cloned().collect());
            }
        }
    }

    async fn drain_pending(&mut self) {
        if self.pending_until_bootstrap.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_until_bootstrap);
        debug!(count = pending.len(), "applying messages buffered before bootstrap");
        for (message, from_mailbox) in pending {
            self.apply_inbound(message, from_mailbox).await;
        }
    }

    async fn apply_inbound(&mut self, message: DisputeMessage, from_mailbox: bool) {
        let uid = message.uid().to_string();
        self.dispatch(message).await;
        if from_mailbox {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                transport.remove_from_mailbox(&uid).await;
            });
        }
    }

    async fn dispatch(&mut self, message: DisputeMessage) {
        debug!(
            kind = message.kind(),
            trade_id = %sanitize_trade_id(message.trade_id()),
            uid = %sanitize_uid(message.uid()),
            "dispatching dispute message"
        );
        match message {
            DisputeMessage::OpenNewDispute { dispute, .. } => {
                self.on_open_new_dispute(dispute).await
            }
            DisputeMessage::PeerOpenedDispute { dispute, .. } => {
                self.on_peer_opened_dispute(dispute).await
            }
            DisputeMessage::Chat(msg) => self.on_chat_message(msg),
            message @ DisputeMessage::DisputeResult { .. } => {
                self.on_dispute_result(message).await
            }
            message @ DisputeMessage::PeerPublishedPayoutTx { .. } => {
                self.on_peer_payout_tx(message).await
            }
        }
    }

    // ========================================================================
    // Inbound handlers
    // ========================================================================

    /// Arbitrator receives this from the trader who opened the dispute.
    async fn on_open_new_dispute(&mut self, dispute: Dispute) {
        if !self.is_arbitrator(&dispute) {
            error!(
                trade_id = %sanitize_trade_id(dispute.trade_id()),
                "trader received an open-new-dispute message, dropping"
            );
            return;
        }
        if self.store.contains(dispute.trade_id(), dispute.trader_id()) {
            warn!(
                trade_id = %sanitize_trade_id(dispute.trade_id()),
                "dispute already open for that trade and trading peer"
            );
            return;
        }
        let trade_id = dispute.trade_id().to_string();
        let dispute_id = dispute.id().to_string();
        let is_support_ticket = dispute.is_support_ticket;
        let mirror = dispute.mirrored_for_peer();
        self.store.add(dispute);
        self.events.emit(DisputeEvent::DisputeOpened {
            dispute_id,
            trade_id: trade_id.clone(),
        });
        self.reconcile_duplicate_disputes().await;

        // Mirror the dispute for the counterparty and forward it.
        let mut mirror = match mirror {
            Ok(mirror) => mirror,
            Err(e) => {
                error!(
                    trade_id = %sanitize_trade_id(&trade_id),
                    error = %e,
                    "failed to build mirrored dispute for peer"
                );
                return;
            }
        };
        if self.store.contains(&trade_id, mirror.trader_id()) {
            warn!(
                trade_id = %sanitize_trade_id(&trade_id),
                "dispute already open for the counterparty, not mirroring again"
            );
            return;
        }
        let sys_text = if is_support_ticket {
            "Your trading peer opened a support ticket."
        } else {
            "Your trading peer opened a dispute. The arbitrator will review the case."
        };
        let sys = ChatMessage::system(
            &trade_id,
            self.own_ring.trader_id(),
            sys_text,
            self.transport.own_address(),
        );
        mirror.add_chat_message(sys.clone());
        let mirror_id = mirror.id().to_string();
        let recipient_ring = mirror.trader_pub_key_ring().clone();
        let recipient_address = mirror.contract().address_of_ring(&recipient_ring).clone();
        self.store.add(mirror.clone());
        self.events.emit(DisputeEvent::DisputeMirrored {
            dispute_id: mirror_id,
            trade_id: trade_id.clone(),
        });
        let message = DisputeMessage::PeerOpenedDispute {
            dispute: mirror,
            sender_node_address: self.transport.own_address(),
            uid: Uuid::new_v4().to_string(),
        };
        self.send_mailbox_message(
            recipient_address,
            recipient_ring,
            message,
            Some((trade_id, sys.uid)),
            None,
        );
    }

    /// The non-opening trader receives this from the arbitrator.
    async fn on_peer_opened_dispute(&mut self, dispute: Dispute) {
        if self.is_arbitrator(&dispute) {
            error!(
                trade_id = %sanitize_trade_id(dispute.trade_id()),
                "arbitrator received a peer-opened-dispute message, dropping"
            );
            return;
        }
        if self.store.contains(dispute.trade_id(), dispute.trader_id()) {
            warn!(
                trade_id = %sanitize_trade_id(dispute.trade_id()),
                "mirrored dispute already stored"
            );
            return;
        }
        let trade_id = dispute.trade_id().to_string();
        let dispute_id = dispute.id().to_string();
        self.store.add(dispute);
        self.trades.mark_dispute_started_by_peer(&trade_id).await;
        self.events.emit(DisputeEvent::PeerOpenedDispute {
            dispute_id,
            trade_id: trade_id.clone(),
        });
        self.reconcile_duplicate_disputes().await;
    }

    /// A trader receives chat from the arbitrator, or the arbitrator from a
    /// trader. Trader-to-trader is not a legal route.
    fn on_chat_message(&mut self, msg: ChatMessage) {
        let trade_id = msg.trade_id.clone();
        let uid = msg.uid.clone();
        let roles = self
            .store
            .find(&trade_id, msg.trader_id)
            .map(|d| (self.is_trader(d), self.is_arbitrator(d)));
        let Some((local_is_trader, local_is_arbitrator)) = roles else {
            debug!(
                trade_id = %sanitize_trade_id(&trade_id),
                "no matching dispute for chat message yet"
            );
            self.schedule_retry(
                self.config.retry.chat_delay(),
                DisputeMessage::Chat(msg),
            );
            return;
        };
        // The dispute exists, so any pending redelivery is obsolete even if
        // the message is about to be dropped for a role violation.
        self.retries.cancel(&uid);
        if msg.sender_is_trader && !local_is_arbitrator {
            error!(
                trade_id = %sanitize_trade_id(&trade_id),
                "trader-sent chat message arrived at a non-arbitrator, dropping"
            );
            return;
        }
        if !msg.sender_is_trader && !local_is_trader && !msg.is_system_message {
            error!(
                trade_id = %sanitize_trade_id(&trade_id),
                "arbitrator-sent chat message arrived at a non-trader, dropping"
            );
            return;
        }

        let mut added = None;
        if let Some(dispute) = self.store.find_mut(&trade_id, msg.trader_id) {
            if dispute.contains_chat_message(&msg) {
                warn!(
                    trade_id = %sanitize_trade_id(&trade_id),
                    uid = %sanitize_uid(&uid),
                    "chat message already stored, deduplicating"
                );
            } else {
                dispute.add_chat_message(msg);
                added = Some(dispute.id().to_string());
            }
        }
        if let Some(dispute_id) = added {
            self.store.persist();
            self.events
                .emit(DisputeEvent::ChatMessageAdded { dispute_id, uid });
        }
    }

    /// Both traders receive the ruling; the arbitrator must not.
    async fn on_dispute_result(&mut self, message: DisputeMessage) {
        let DisputeMessage::DisputeResult {
            dispute_result: result,
            ..
        } = &message
        else {
            return;
        };
        if result.arbitrator_pub_key == self.own_ring.signature_pub_key {
            error!(
                trade_id = %sanitize_trade_id(&result.trade_id),
                "arbitrator received a dispute result message, dropping"
            );
            return;
        }
        let trade_id = result.trade_id.clone();
        let uid = message.uid().to_string();
        match self.store.find(&trade_id, result.trader_id) {
            None => {
                debug!(
                    trade_id = %sanitize_trade_id(&trade_id),
                    "dispute result arrived before the dispute, scheduling redelivery"
                );
                self.schedule_retry(self.config.retry.result_delay(), message.clone());
                return;
            }
            Some(dispute) if dispute.is_closed() => {
                // A re-sent ruling for a closed dispute is tolerated and
                // re-applied: after a failed broadcast it is the trader's
                // only way back into the payout path. The coordinator skips
                // publishing when a payout tx id is already recorded.
                warn!(
                    trade_id = %sanitize_trade_id(&trade_id),
                    "dispute already closed, re-applying repeated dispute result"
                );
            }
            Some(_) => {}
        }
        self.retries.cancel(&uid);

        let result = result.clone();
        let mut closed = None;
        if let Some(dispute) = self.store.find_mut(&trade_id, result.trader_id) {
            if let Some(closing) = result.chat_message.clone() {
                if dispute.contains_chat_message(&closing) {
                    warn!(
                        trade_id = %sanitize_trade_id(&trade_id),
                        "closing message already stored, deduplicating"
                    );
                } else {
                    dispute.add_chat_message(closing);
                }
            }
            dispute.set_closed();
            dispute.set_dispute_result(result.clone());
            closed = Some((dispute.id().to_string(), dispute.clone()));
        }
        if let Some((dispute_id, snapshot)) = closed {
            self.store.persist();
            self.events.emit(DisputeEvent::DisputeClosed {
                dispute_id,
                trade_id: trade_id.clone(),
            });
            self.payouts.spawn_settlement(
                snapshot,
                result,
                self.own_ring.clone(),
                self.cmd_tx.clone(),
            );
        }
    }

    /// The non-publishing trader receives the broadcast payout tx.
    async fn on_peer_payout_tx(&mut self, message: DisputeMessage) {
        let DisputeMessage::PeerPublishedPayoutTx {
            transaction,
            trade_id,
            ..
        } = &message
        else {
            return;
        };
        let trade_id = trade_id.clone();
        let uid = message.uid().to_string();
        let local_is_trader = match self.store.find_by_trade_id(&trade_id) {
            Some(dispute) => self.is_trader(dispute),
            None => {
                debug!(
                    trade_id = %sanitize_trade_id(&trade_id),
                    "payout tx arrived before the dispute, scheduling redelivery"
                );
                self.schedule_retry(self.config.retry.payout_tx_delay(), message.clone());
                return;
            }
        };
        // The dispute exists, so any pending redelivery is obsolete even if
        // the message is about to be dropped for a role violation.
        self.retries.cancel(&uid);
        if !local_is_trader {
            error!(
                trade_id = %sanitize_trade_id(&trade_id),
                "peer payout tx arrived at a node that is not a trader in the dispute, dropping"
            );
            return;
        }

        match self.wallet.import_transaction(transaction) {
            Ok(tx) => {
                let mut updated = false;
                if let Some(dispute) = self.store.find_by_trade_id_mut(&trade_id) {
                    dispute.set_dispute_payout_tx_id(tx.tx_id.clone());
                    updated = true;
                }
                if updated {
                    self.store.persist();
                    self.events.emit(DisputeEvent::PayoutTxReceived {
                        trade_id: trade_id.clone(),
                        tx_id: tx.tx_id,
                    });
                }
                self.trades.close_disputed_trade(&trade_id).await;
            }
            Err(e) => error!(
                trade_id = %sanitize_trade_id(&trade_id),
                error = %e,
                "failed to import peer payout tx"
            ),
        }
    }

    // ========================================================================
    // Local operations
    // ========================================================================

    fn on_open_dispute(
        &mut self,
        mut dispute: Dispute,
        reopen: bool,
        respond: oneshot::Sender<Result<(), DisputeError>>,
    ) {
        let trade_id = dispute.trade_id().to_string();
        if self.store.contains(&trade_id, dispute.trader_id()) && !reopen {
            warn!(
                trade_id = %sanitize_trade_id(&trade_id),
                "dispute already open for that trade and trading peer"
            );
            let _ = respond.send(Err(DisputeError::DisputeAlreadyOpen { trade_id }));
            return;
        }
        let sys_text = if dispute.is_support_ticket {
            "You opened a support ticket."
        } else {
            "You opened a dispute. Your case is now with the arbitrator."
        };
        let sys = ChatMessage::system(
            &trade_id,
            self.own_ring.trader_id(),
            sys_text,
            self.transport.own_address(),
        );
        dispute.add_chat_message(sys.clone());
        if reopen {
            self.store.upsert(dispute.clone());
        } else {
            self.store.add(dispute.clone());
        }
        self.events.emit(DisputeEvent::DisputeOpened {
            dispute_id: dispute.id().to_string(),
            trade_id: trade_id.clone(),
        });

        let recipient = dispute.contract().arbitrator_node_address.clone();
        let recipient_ring = dispute.arbitrator_pub_key_ring().clone();
        let message = DisputeMessage::OpenNewDispute {
            dispute,
            sender_node_address: self.transport.own_address(),
            uid: Uuid::new_v4().to_string(),
        };
        self.send_mailbox_message(
            recipient,
            recipient_ring,
            message,
            Some((trade_id, sys.uid)),
            Some(respond),
        );
    }

    fn on_send_chat(
        &mut self,
        trade_id: String,
        trader_id: i32,
        text: String,
        attachments: Vec<Attachment>,
        respond: oneshot::Sender<Result<ChatMessage, DisputeError>>,
    ) {
        let Some(dispute) = self.store.find(&trade_id, trader_id) else {
            let _ = respond.send(Err(DisputeError::DisputeNotFound { trade_id }));
            return;
        };
        let local_is_trader = self.is_trader(dispute);
        let local_is_arbitrator = self.is_arbitrator(dispute);
        let (recipient, recipient_ring) = if local_is_trader {
            (
                dispute.contract().arbitrator_node_address.clone(),
                dispute.arbitrator_pub_key_ring().clone(),
            )
        } else if local_is_arbitrator {
            let ring = dispute.trader_pub_key_ring().clone();
            (dispute.contract().address_of_ring(&ring).clone(), ring)
        } else {
            // The only legal routes are trader<->arbitrator.
            let _ = respond.send(Err(DisputeError::ProtocolViolation(
                "a trader cannot message the other trader directly".into(),
            )));
            return;
        };
        let msg = ChatMessage::new(
            &trade_id,
            dispute.trader_pub_key_ring().trader_id(),
            local_is_trader,
            text,
            attachments,
            self.transport.own_address(),
        );

        let mut dispute_id = None;
        if let Some(dispute) = self.store.find_mut(&trade_id, trader_id) {
            dispute.add_chat_message(msg.clone());
            dispute_id = Some(dispute.id().to_string());
        }
        if let Some(dispute_id) = dispute_id {
            self.store.persist();
            self.events.emit(DisputeEvent::ChatMessageAdded {
                dispute_id,
                uid: msg.uid.clone(),
            });
        }
        self.send_mailbox_message(
            recipient,
            recipient_ring,
            DisputeMessage::Chat(msg.clone()),
            Some((trade_id, msg.uid.clone())),
            None,
        );
        let _ = respond.send(Ok(msg));
    }

    fn on_send_result(
        &mut self,
        mut result: DisputeResult,
        summary: String,
        respond: oneshot::Sender<Result<(), DisputeError>>,
    ) {
        let trade_id = result.trade_id.clone();
        let Some(dispute) = self.store.find(&trade_id, result.trader_id) else {
            let _ = respond.send(Err(DisputeError::DisputeNotFound { trade_id }));
            return;
        };
        if !self.is_arbitrator(dispute) {
            let _ = respond.send(Err(DisputeError::ProtocolViolation(
                "only the arbitrator can issue a dispute result".into(),
            )));
            return;
        }
        let closing = ChatMessage::new(
            &trade_id,
            dispute.trader_pub_key_ring().trader_id(),
            false,
            summary,
            Vec::new(),
            self.transport.own_address(),
        );
        result.chat_message = Some(closing.clone());
        let recipient_ring = dispute.trader_pub_key_ring().clone();
        let recipient = dispute.contract().address_of_ring(&recipient_ring).clone();

        let mut dispute_id = None;
        if let Some(dispute) = self.store.find_mut(&trade_id, result.trader_id) {
            dispute.add_chat_message(closing.clone());
            dispute.set_closed();
            dispute.set_dispute_result(result.clone());
            dispute_id = Some(dispute.id().to_string());
        }
        if let Some(dispute_id) = dispute_id {
            self.store.persist();
            self.events.emit(DisputeEvent::DisputeClosed {
                dispute_id,
                trade_id: trade_id.clone(),
            });
        }
        let message = DisputeMessage::DisputeResult {
            dispute_result: result,
            sender_node_address: self.transport.own_address(),
            uid: Uuid::new_v4().to_string(),
        };
        self.send_mailbox_message(
            recipient,
            recipient_ring,
            message,
            Some((trade_id, closing.uid)),
            None,
        );
        let _ = respond.send(Ok(()));
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    fn on_delivery_outcome(
        &mut self,
        trade_id: String,
        chat_uid: String,
        outcome: Result<DeliveryReceipt, String>,
    ) {
        match outcome {
            Ok(receipt) => {
                let mut updated = false;
                if let Some(dispute) = self.store.find_by_chat_uid_mut(&trade_id, &chat_uid) {
                    if let Some(msg) = dispute.chat_message_by_uid_mut(&chat_uid) {
                        match receipt {
                            DeliveryReceipt::Arrived => msg.arrived = true,
                            DeliveryReceipt::StoredInMailbox => msg.stored_in_mailbox = true,
                        }
                        updated = true;
                    }
                }
                if updated {
                    self.store.persist();
                }
            }
            Err(e) => error!(
                trade_id = %sanitize_trade_id(&trade_id),
                uid = %sanitize_uid(&chat_uid),
                error = %e,
                "mailbox delivery failed"
            ),
        }
    }

    fn on_payout_recorded(&mut self, trade_id: String, tx_id: String) {
        let mut updated = false;
        if let Some(dispute) = self.store.find_by_trade_id_mut(&trade_id) {
            dispute.set_dispute_payout_tx_id(tx_id.clone());
            updated = true;
        }
        if updated {
            self.store.persist();
        } else {
            warn!(
                trade_id = %sanitize_trade_id(&trade_id),
                "payout recorded for a trade with no stored dispute"
            );
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn is_trader(&self, dispute: &Dispute) -> bool {
        *dispute.trader_pub_key_ring() == self.own_ring
    }

    fn is_arbitrator(&self, dispute: &Dispute) -> bool {
        *dispute.arbitrator_pub_key_ring() == self.own_ring
    }

    /// Schedule the single redelivery for a causally-premature message, or
    /// declare it stuck if its one retry was already used.
    fn schedule_retry(&mut self, delay: std::time::Duration, message: DisputeMessage) {
        let uid = message.uid().to_string();
        let trade_id = message.trade_id().to_string();
        let kind = message.kind().to_string();
        if !self
            .retries
            .schedule(delay, message, self.cmd_tx.clone())
        {
            warn!(
                trade_id = %sanitize_trade_id(&trade_id),
                uid = %sanitize_uid(&uid),
                kind = %kind,
                "message still not applicable after its single redelivery, leaving for operator inspection"
            );
            self.events.emit(DisputeEvent::MessageStuck {
                kind,
                uid,
                trade_id,
            });
        }
    }

    /// Force-close duplicate open disputes that share `(trade_id,
    /// trader_id)` with an already-closed record. Happens when a trader
    /// opened twice because the arbitrator was offline and the "already
    /// open" rejection never reached them.
    async fn reconcile_duplicate_disputes(&mut self) {
        let forced = self.store.reconcile_duplicates();
        if forced.is_empty() {
            return;
        }
        let mut trades_closed = HashSet::new();
        for (trade_id, trader_id) in forced {
            warn!(
                trade_id = %sanitize_trade_id(&trade_id),
                trader_id,
                "force-closed duplicate open dispute"
            );
            self.events.emit(DisputeEvent::DisputeClosed {
                dispute_id: format!("{}_{}", trade_id, trader_id),
                trade_id: trade_id.clone(),
            });
            if trades_closed.insert(trade_id.clone()) {
                self.trades.close_disputed_trade(&trade_id).await;
            }
        }
    }

    /// Fire-and-forget mailbox send; the outcome is marshaled back onto the
    /// engine mailbox to update the tracked chat message's delivery flags.
    fn send_mailbox_message(
        &self,
        recipient: NodeAddress,
        recipient_ring: PubKeyRing,
        message: DisputeMessage,
        track: Option<(String, String)>,
        respond: Option<oneshot::Sender<Result<(), DisputeError>>>,
    ) {
        let transport = self.transport.clone();
        let cmd_tx = self.cmd_tx.clone();
        let kind = message.kind();
        let trade_id = message.trade_id().to_string();
        tokio::spawn(async move {
            match transport
                .send_encrypted(recipient, recipient_ring, message)
                .await
            {
                Ok(receipt) => {
                    info!(
                        kind,
                        trade_id = %sanitize_trade_id(&trade_id),
                        ?receipt,
                        "dispute message delivered"
                    );
                    if let Some((trade_id, chat_uid)) = track {
                        let _ = cmd_tx
                            .send(EngineCommand::DeliveryOutcome {
                                trade_id,
                                chat_uid,
                                outcome: Ok(receipt),
                            })
                            .await;
                    }
                    if let Some(respond) = respond {
                        let _ = respond.send(Ok(()));
                    }
                }
                Err(e) => {
                    error!(
                        kind,
                        trade_id = %sanitize_trade_id(&trade_id),
                        error = %e,
                        "sending dispute message failed"
                    );
                    if let Some((trade_id, chat_uid)) = track {
                        let _ = cmd_tx
                            .send(EngineCommand::DeliveryOutcome {
                                trade_id,
                                chat_uid,
                                outcome: Err(e.to_string()),
                            })
                            .await;
                    }
                    if let Some(respond) = respond {
                        let _ =
                            respond.send(Err(DisputeError::MessageDeliveryFailed(e.to_string())));
                    }
                }
            }
        });
    }
}
