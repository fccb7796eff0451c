//! End-to-end dispute protocol flows across buyer, seller and arbitrator
//! nodes wired through an in-memory routed network.

mod support;

use std::time::Duration;

use kestrel_arbitration::config::ArbitrationConfig;
use kestrel_arbitration::error::DisputeError;
use kestrel_arbitration::events::DisputeEvent;
use kestrel_arbitration::messages::DisputeMessage;
use kestrel_arbitration::models::{ChatMessage, Dispute};

use support::*;

#[tokio::test(start_paused = true)]
async fn test_open_dispute_reaches_arbitrator_and_counterparty() {
    let network = TestNetwork::new();
    let t = trio(&network);

    let dispute = opener_dispute("T1", &t, true);
    t.buyer.handle.open_dispute(dispute, false).await.unwrap();

    // The arbitrator ends up with both the opener's record and the mirror.
    eventually(|| async { t.arbitrator.handle.disputes().await.unwrap().len() == 2 }).await;
    eventually(|| async { t.seller.handle.disputes().await.unwrap().len() == 1 }).await;

    let arb_view = t.arbitrator.handle.disputes().await.unwrap();
    let opener = arb_view
        .iter()
        .find(|d| d.trader_pub_key_ring() == &t.buyer.ring)
        .unwrap();
    let mirror = arb_view
        .iter()
        .find(|d| d.trader_pub_key_ring() == &t.seller.ring)
        .unwrap();
    assert!(opener.dispute_opener_is_buyer);
    assert!(!mirror.dispute_opener_is_buyer);
    assert_eq!(opener.deposit_tx_serialized, mirror.deposit_tx_serialized);

    // The counterparty's mirrored record describes the opener from their
    // perspective and carries the generated system message.
    let seller_view = t.seller.handle.disputes().await.unwrap();
    assert!(!seller_view[0].dispute_opener_is_buyer);
    assert!(seller_view[0]
        .chat_messages()
        .iter()
        .any(|m| m.is_system_message));
    assert!(t
        .seller
        .trades
        .peer_started
        .lock()
        .unwrap()
        .contains(&"T1".to_string()));

    // The opener's own system message gets its delivery receipt recorded.
    eventually(|| async {
        let disputes = t.buyer.handle.disputes().await.unwrap();
        disputes[0]
            .chat_messages()
            .iter()
            .any(|m| m.is_system_message && m.arrived)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_second_open_for_same_trade_rejected_unless_reopen() {
    let network = TestNetwork::new();
    let t = trio(&network);

    let dispute = opener_dispute("T1", &t, true);
    t.buyer
        .handle
        .open_dispute(dispute.clone(), false)
        .await
        .unwrap();

    let err = t
        .buyer
        .handle
        .open_dispute(dispute.clone(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::DisputeAlreadyOpen { .. }));

    // The explicit reopen path replaces the record instead.
    t.buyer.handle.open_dispute(dispute, true).await.unwrap();
    assert_eq!(t.buyer.handle.disputes().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_chat_routes_between_trader_and_arbitrator() {
    let network = TestNetwork::new();
    let t = trio(&network);
    t.buyer
        .handle
        .open_dispute(opener_dispute("T1", &t, true), false)
        .await
        .unwrap();
    eventually(|| async { t.arbitrator.handle.disputes().await.unwrap().len() == 2 }).await;

    let buyer_id = t.buyer.ring.trader_id();
    let msg = t
        .buyer
        .handle
        .send_chat_message("T1", buyer_id, "payment went out monday", Vec::new())
        .await
        .unwrap();
    eventually(|| async {
        let disputes = t.arbitrator.handle.disputes().await.unwrap();
        disputes
            .iter()
            .any(|d| d.chat_messages().iter().any(|m| m.uid == msg.uid))
    })
    .await;

    // A redelivered copy deduplicates by value.
    t.arbitrator
        .handle
        .deliver(DisputeMessage::Chat(msg.clone()))
        .await;
    let disputes = t.arbitrator.handle.disputes().await.unwrap();
    let copies: usize = disputes
        .iter()
        .map(|d| d.chat_messages().iter().filter(|m| m.uid == msg.uid).count())
        .sum();
    assert_eq!(copies, 1);

    // And the arbitrator can answer on the buyer's record.
    let reply = t
        .arbitrator
        .handle
        .send_chat_message("T1", buyer_id, "please upload the bank statement", Vec::new())
        .await
        .unwrap();
    eventually(|| async {
        let disputes = t.buyer.handle.disputes().await.unwrap();
        disputes[0].chat_messages().iter().any(|m| m.uid == reply.uid)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_trader_authored_chat_dropped_by_non_arbitrator() {
    let network = TestNetwork::new();
    let t = trio(&network);
    t.buyer
        .handle
        .open_dispute(opener_dispute("T1", &t, true), false)
        .await
        .unwrap();
    eventually(|| async { t.seller.handle.disputes().await.unwrap().len() == 1 }).await;
    let before = t.seller.handle.disputes().await.unwrap()[0]
        .chat_messages()
        .len();

    // A trader-authored message must only ever reach the arbitrator.
    let rogue = ChatMessage::new(
        "T1",
        t.seller.ring.trader_id(),
        true,
        "psst, cancel the dispute",
        Vec::new(),
        t.buyer.address.clone(),
    );
    t.seller
        .handle
        .deliver(DisputeMessage::Chat(rogue))
        .await;

    let after = t.seller.handle.disputes().await.unwrap()[0]
        .chat_messages()
        .len();
    assert_eq!(before, after);
}

#[tokio::test(start_paused = true)]
async fn test_trader_cannot_address_the_other_trader() {
    let network = TestNetwork::new();
    let t = trio(&network);
    t.buyer
        .handle
        .open_dispute(opener_dispute("T1", &t, true), false)
        .await
        .unwrap();
    eventually(|| async { t.seller.handle.disputes().await.unwrap().len() == 1 }).await;

    // On the seller node the stored dispute belongs to the seller; asking
    // it to send on a record it is neither trader nor arbitrator of fails.
    let err = t
        .seller
        .handle
        .send_chat_message("T1", t.buyer.ring.trader_id(), "hello buyer", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::DisputeNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_early_chat_applies_after_single_redelivery() {
    let network = TestNetwork::new();
    let t = trio(&network);

    // Chat reaches the arbitrator before the dispute it belongs to.
    let early = ChatMessage::new(
        "T1",
        t.buyer.ring.trader_id(),
        true,
        "I was scammed",
        Vec::new(),
        t.buyer.address.clone(),
    );
    t.arbitrator
        .handle
        .deliver(DisputeMessage::Chat(early.clone()))
        .await;
    assert!(t.arbitrator.handle.disputes().await.unwrap().is_empty());

    t.buyer
        .handle
        .open_dispute(opener_dispute("T1", &t, true), false)
        .await
        .unwrap();

    // The single delayed redelivery lands it once the dispute exists.
    eventually(|| async {
        let disputes = t.arbitrator.handle.disputes().await.unwrap();
        disputes
            .iter()
            .any(|d| d.chat_messages().iter().any(|m| m.uid == early.uid))
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_message_declared_stuck_after_one_retry() {
    let network = TestNetwork::new();
    let t = trio(&network);
    let mut events = t.arbitrator.handle.subscribe();

    let orphan = ChatMessage::new(
        "T-nowhere",
        1234,
        true,
        "hello?",
        Vec::new(),
        t.buyer.address.clone(),
    );
    t.arbitrator
        .handle
        .deliver(DisputeMessage::Chat(orphan.clone()))
        .await;

    let stuck_uid = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if let Ok(DisputeEvent::MessageStuck { uid, .. }) = events.recv().await {
                break uid;
            }
        }
    })
    .await
    .expect("stuck event should be emitted");
    assert_eq!(stuck_uid, orphan.uid);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_redelivery_frees_its_retry_slot() {
    let network = TestNetwork::new();
    let t = trio(&network);
    let config = ArbitrationConfig {
        max_pending_retries: 1,
        ..ArbitrationConfig::default()
    };
    let arb = spawn_node_full(
        &network,
        ring(93),
        node_address("arb3.onion"),
        config,
        MemPersistence::empty(),
        true,
    );

    let dispute_for = |trade_id: &str| {
        let mut contract = contract_for(trade_id, &t);
        contract.arbitrator_node_address = arb.address.clone();
        let mut dispute = Dispute::new(
            trade_id,
            t.buyer.ring.clone(),
            arb.ring.clone(),
            true,
            true,
            contract,
        )
        .unwrap();
        dispute.deposit_tx_serialized = Some(vec![0xde, 0xad]);
        dispute
    };

    // An arbitrator-authored chat arrives at the arbitrator before its
    // dispute, taking the only redelivery slot. Once the dispute exists the
    // redelivered copy is dropped as a role violation.
    let rogue = ChatMessage::new(
        "T1",
        t.buyer.ring.trader_id(),
        false,
        "case closed, trust me",
        Vec::new(),
        t.seller.address.clone(),
    );
    arb.handle.deliver(DisputeMessage::Chat(rogue.clone())).await;
    t.buyer
        .handle
        .open_dispute(dispute_for("T1"), false)
        .await
        .unwrap();
    eventually(|| async { arb.handle.disputes().await.unwrap().len() == 2 }).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    let disputes = arb.handle.disputes().await.unwrap();
    assert!(disputes
        .iter()
        .all(|d| d.chat_messages().iter().all(|m| m.uid != rogue.uid)));

    // The drop released the slot: a fresh premature chat still gets its
    // redelivery and applies once its dispute shows up.
    let early = ChatMessage::new(
        "T2",
        t.buyer.ring.trader_id(),
        true,
        "seller went quiet",
        Vec::new(),
        t.buyer.address.clone(),
    );
    arb.handle.deliver(DisputeMessage::Chat(early.clone())).await;
    t.buyer
        .handle
        .open_dispute(dispute_for("T2"), false)
        .await
        .unwrap();
    eventually(|| async {
        let disputes = arb.handle.disputes().await.unwrap();
        disputes
            .iter()
            .any(|d| d.chat_messages().iter().any(|m| m.uid == early.uid))
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_messages_buffered_until_bootstrap() {
    let network = TestNetwork::new();
    let t = trio(&network);
    let offline_arb = spawn_node_with(
        &network,
        ring(91),
        node_address("arb2.onion"),
        MemPersistence::empty(),
        false,
    );

    let mut contract = contract_for("T1", &t);
    contract.arbitrator_node_address = offline_arb.address.clone();
    let mut dispute = Dispute::new(
        "T1",
        t.buyer.ring.clone(),
        offline_arb.ring.clone(),
        true,
        true,
        contract,
    )
    .unwrap();
    dispute.deposit_tx_serialized = Some(vec![0xde, 0xad]);
    offline_arb
        .handle
        .deliver(DisputeMessage::OpenNewDispute {
            dispute,
            sender_node_address: t.buyer.address.clone(),
            uid: "open-1".into(),
        })
        .await;
    assert!(offline_arb.handle.disputes().await.unwrap().is_empty());

    offline_arb
        .transport
        .bootstrapped
        .store(true, std::sync::atomic::Ordering::SeqCst);
    offline_arb.handle.notify_bootstrapped().await;
    eventually(|| async { offline_arb.handle.disputes().await.unwrap().len() == 2 }).await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_open_record_reconciled_on_startup() {
    let network = TestNetwork::new();
    let t = trio(&network);

    let mut closed: Dispute = opener_dispute("T9", &t, true);
    closed.set_closed();
    let open = opener_dispute("T9", &t, true);

    let node = spawn_node_with(
        &network,
        ring(92),
        node_address("restarted.onion"),
        MemPersistence::seeded(vec![closed, open]),
        true,
    );

    eventually(|| async {
        node.handle
            .disputes()
            .await
            .unwrap()
            .iter()
            .all(|d| d.is_closed())
    })
    .await;
    // Trade closure fires exactly once for the reconciled pair.
    assert_eq!(
        node.trades
            .closed_trades
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == "T9")
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_new_dispute_at_trader_node_dropped() {
    let network = TestNetwork::new();
    let t = trio(&network);

    // The buyer is not the arbitrator of this record.
    t.buyer
        .handle
        .deliver(DisputeMessage::OpenNewDispute {
            dispute: opener_dispute("T1", &t, false),
            sender_node_address: t.seller.address.clone(),
            uid: "open-x".into(),
        })
        .await;
    assert!(t.buyer.handle.disputes().await.unwrap().is_empty());
}
