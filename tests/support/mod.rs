//! In-memory doubles for the collaborator traits plus a routed test
//! network, so multi-party dispute flows run inside a single test process.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use kestrel_arbitration::config::ArbitrationConfig;
use kestrel_arbitration::engine::{DisputeEngine, DisputeEngineHandle};
use kestrel_arbitration::error::DisputeError;
use kestrel_arbitration::messages::DisputeMessage;
use kestrel_arbitration::models::{
    Contract, Dispute, DisputeReason, DisputeResult, NodeAddress, PubKeyRing, Winner,
};
use kestrel_arbitration::traits::{
    DeliveryReceipt, DisputePersistence, MailboxTransport, PayoutSignRequest, SignedTransaction,
    SigningWallet, TradeLifecycle,
};

// ============================================================================
// Network
// ============================================================================

/// Routes encrypted sends straight to the recipient node's engine handle.
pub struct TestNetwork {
    nodes: Mutex<HashMap<NodeAddress, DisputeEngineHandle>>,
}

impl TestNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, address: NodeAddress, handle: DisputeEngineHandle) {
        self.nodes.lock().unwrap().insert(address, handle);
    }

    fn handle_for(&self, address: &NodeAddress) -> Option<DisputeEngineHandle> {
        self.nodes.lock().unwrap().get(address).cloned()
    }
}

/// One node's view of the network.
pub struct NodeTransport {
    network: Arc<TestNetwork>,
    own: NodeAddress,
    pub bootstrapped: AtomicBool,
}

#[async_trait]
impl MailboxTransport for NodeTransport {
    async fn send_encrypted(
        &self,
        recipient: NodeAddress,
        _recipient_pub_key_ring: PubKeyRing,
        message: DisputeMessage,
    ) -> Result<DeliveryReceipt, DisputeError> {
        match self.network.handle_for(&recipient) {
            Some(handle) => {
                handle.deliver(message).await;
                Ok(DeliveryReceipt::Arrived)
            }
            None => Err(DisputeError::MessageDeliveryFailed(format!(
                "no route to {}",
                recipient
            ))),
        }
    }

    fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    fn own_address(&self) -> NodeAddress {
        self.own.clone()
    }

    async fn remove_from_mailbox(&self, _uid: &str) {}
}

// ============================================================================
// Wallet / trades / persistence doubles
// ============================================================================

/// Deterministic wallet: signing `T1` yields tx id `payout-T1`, and imports
/// recover the tx id from the raw bytes, so publisher and importer agree.
#[derive(Default)]
pub struct FakeWallet {
    pub sign_requests: Mutex<Vec<PayoutSignRequest>>,
    pub broadcasts: Mutex<Vec<String>>,
    pub imports: Mutex<Vec<String>>,
    pub fail_broadcast: AtomicBool,
}

#[async_trait]
impl SigningWallet for FakeWallet {
    async fn co_sign_and_finalize_payout(
        &self,
        request: PayoutSignRequest,
    ) -> Result<SignedTransaction, DisputeError> {
        let tx_id = format!("payout-{}", request.trade_id);
        self.sign_requests.lock().unwrap().push(request);
        Ok(SignedTransaction {
            raw: tx_id.clone().into_bytes(),
            tx_id,
        })
    }

    fn import_transaction(&self, raw: &[u8]) -> Result<SignedTransaction, DisputeError> {
        let tx_id = String::from_utf8(raw.to_vec())
            .map_err(|e| DisputeError::SigningFailed(e.to_string()))?;
        self.imports.lock().unwrap().push(tx_id.clone());
        Ok(SignedTransaction {
            raw: raw.to_vec(),
            tx_id,
        })
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, DisputeError> {
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(DisputeError::BroadcastFailed("mempool rejected".into()));
        }
        self.broadcasts.lock().unwrap().push(tx.tx_id.clone());
        Ok(tx.tx_id.clone())
    }
}

#[derive(Default)]
pub struct FakeTrades {
    pub open_trades: Mutex<HashSet<String>>,
    pub closed_trades: Mutex<Vec<String>>,
    pub peer_started: Mutex<Vec<String>>,
    pub known_payouts: Mutex<HashMap<String, SignedTransaction>>,
    pub closed_offers: Mutex<Vec<String>>,
}

#[async_trait]
impl TradeLifecycle for FakeTrades {
    async fn close_disputed_trade(&self, trade_id: &str) {
        self.open_trades.lock().unwrap().remove(trade_id);
        self.closed_trades.lock().unwrap().push(trade_id.to_string());
    }

    async fn mark_dispute_started_by_peer(&self, trade_id: &str) {
        self.peer_started.lock().unwrap().push(trade_id.to_string());
    }

    async fn payout_tx_for(&self, trade_id: &str) -> Option<SignedTransaction> {
        self.known_payouts.lock().unwrap().get(trade_id).cloned()
    }

    async fn has_open_trade(&self, trade_id: &str) -> bool {
        self.open_trades.lock().unwrap().contains(trade_id)
    }

    async fn close_open_offer(&self, offer_id: &str) -> bool {
        self.closed_offers.lock().unwrap().push(offer_id.to_string());
        true
    }
}

pub struct MemPersistence {
    seeded: Mutex<Vec<Dispute>>,
    pub snapshots: Mutex<Vec<Vec<Dispute>>>,
}

impl MemPersistence {
    pub fn empty() -> Arc<Self> {
        Self::seeded(Vec::new())
    }

    pub fn seeded(disputes: Vec<Dispute>) -> Arc<Self> {
        Arc::new(Self {
            seeded: Mutex::new(disputes),
            snapshots: Mutex::new(Vec::new()),
        })
    }
}

impl DisputePersistence for MemPersistence {
    fn load(&self) -> Result<Vec<Dispute>, DisputeError> {
        Ok(self.seeded.lock().unwrap().clone())
    }

    fn queue_write(&self, disputes: Vec<Dispute>) {
        self.snapshots.lock().unwrap().push(disputes);
    }
}

// ============================================================================
// Nodes and fixtures
// ============================================================================

pub struct TestNode {
    pub ring: PubKeyRing,
    pub address: NodeAddress,
    pub handle: DisputeEngineHandle,
    pub wallet: Arc<FakeWallet>,
    pub trades: Arc<FakeTrades>,
    pub transport: Arc<NodeTransport>,
}

pub fn spawn_node(network: &Arc<TestNetwork>, ring: PubKeyRing, address: NodeAddress) -> TestNode {
    spawn_node_with(network, ring, address, MemPersistence::empty(), true)
}

/// Opt-in log output for debugging test runs (`RUST_LOG=debug cargo test`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn spawn_node_with(
    network: &Arc<TestNetwork>,
    ring: PubKeyRing,
    address: NodeAddress,
    persistence: Arc<MemPersistence>,
    bootstrapped: bool,
) -> TestNode {
    spawn_node_full(
        network,
        ring,
        address,
        ArbitrationConfig::default(),
        persistence,
        bootstrapped,
    )
}

pub fn spawn_node_full(
    network: &Arc<TestNetwork>,
    ring: PubKeyRing,
    address: NodeAddress,
    config: ArbitrationConfig,
    persistence: Arc<MemPersistence>,
    bootstrapped: bool,
) -> TestNode {
    init_tracing();
    let transport = Arc::new(NodeTransport {
        network: network.clone(),
        own: address.clone(),
        bootstrapped: AtomicBool::new(bootstrapped),
    });
    let wallet = Arc::new(FakeWallet::default());
    let trades = Arc::new(FakeTrades::default());
    let handle = DisputeEngine::spawn(
        ring.clone(),
        config,
        transport.clone(),
        wallet.clone(),
        trades.clone(),
        persistence,
    )
    .unwrap();
    network.register(address.clone(), handle.clone());
    TestNode {
        ring,
        address,
        handle,
        wallet,
        trades,
        transport,
    }
}

pub fn ring(seed: u8) -> PubKeyRing {
    PubKeyRing::new(vec![seed; 32], vec![seed.wrapping_add(1); 32])
}

pub fn node_address(host: &str) -> NodeAddress {
    NodeAddress::new(host, 1000)
}

/// Buyer, seller and arbitrator nodes sharing one routed network.
pub struct Trio {
    pub buyer: TestNode,
    pub seller: TestNode,
    pub arbitrator: TestNode,
}

pub fn trio(network: &Arc<TestNetwork>) -> Trio {
    Trio {
        buyer: spawn_node(network, ring(10), NodeAddress::new("buyer.onion", 1000)),
        seller: spawn_node(network, ring(20), NodeAddress::new("seller.onion", 1000)),
        arbitrator: spawn_node(network, ring(90), NodeAddress::new("arb.onion", 1000)),
    }
}

pub fn contract_for(trade_id: &str, t: &Trio) -> Contract {
    Contract {
        trade_id: trade_id.into(),
        trade_amount: 100,
        buyer_node_address: t.buyer.address.clone(),
        seller_node_address: t.seller.address.clone(),
        arbitrator_node_address: t.arbitrator.address.clone(),
        buyer_pub_key_ring: t.buyer.ring.clone(),
        seller_pub_key_ring: t.seller.ring.clone(),
        buyer_payout_address: "kb1buyer".into(),
        seller_payout_address: "kb1seller".into(),
        buyer_multisig_pub_key: vec![5; 33],
        seller_multisig_pub_key: vec![6; 33],
    }
}

/// The dispute record the opening trader builds locally.
pub fn opener_dispute(trade_id: &str, t: &Trio, opener_is_buyer: bool) -> Dispute {
    let opener_ring = if opener_is_buyer {
        t.buyer.ring.clone()
    } else {
        t.seller.ring.clone()
    };
    let mut dispute = Dispute::new(
        trade_id,
        opener_ring,
        t.arbitrator.ring.clone(),
        opener_is_buyer,
        opener_is_buyer,
        contract_for(trade_id, t),
    )
    .unwrap();
    dispute.deposit_tx_serialized = Some(vec![0xde, 0xad, 0xbe, 0xef]);
    dispute.deposit_tx_id = Some("deposit-tx".into());
    dispute
}

pub fn ruling(
    trade_id: &str,
    trader_id: i32,
    arbitrator_ring: &PubKeyRing,
    winner: Winner,
    is_loser_publisher: bool,
) -> DisputeResult {
    DisputeResult {
        trade_id: trade_id.into(),
        trader_id,
        winner,
        reason: DisputeReason::NoReply,
        tamper_proof_evidence: false,
        summary_notes: String::new(),
        chat_message: None,
        arbitrator_signature: vec![7; 64],
        arbitrator_pub_key: arbitrator_ring.signature_pub_key.clone(),
        buyer_payout_amount: if winner == Winner::Buyer { 95 } else { 5 },
        seller_payout_amount: if winner == Winner::Buyer { 5 } else { 95 },
        is_loser_publisher,
        close_date: Utc::now(),
    }
}

/// Poll until `cond` holds; panics after a bounded number of rounds. With a
/// paused clock the sleeps only advance virtual time.
pub async fn eventually<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition was not reached in time");
}
