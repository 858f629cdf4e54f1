//! End-to-end negotiation over an in-process topic: buyer, seller, and
//! payment agent exchanging real envelopes, signed, with settlement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bazaar_agents::{AgentContext, BuyerAgent, PaymentAgent, SellerAgent};
use bazaar_types::config::{BuyerPolicy, PaymentConfig, SellerPolicy};
use bazaar_types::message::AgentId;
use bazaar_types::signing::{Ed25519Signer, MessageSigner, NoopSigner};
use bazaar_wire::topic::{MemoryTopic, Topic};
use bazaar_wire::transfer::{MockTransferTool, TransferTool};

struct Market {
    topic: Arc<MemoryTopic>,
    tool: Arc<MockTransferTool>,
    buyer: BuyerAgent,
    seller: SellerAgent,
    payment: PaymentAgent,
}

fn market(buyer_policy: BuyerPolicy, seller_policy: SellerPolicy, signed: bool) -> Market {
    let topic = Arc::new(MemoryTopic::new("bazaar.test"));
    let tool = Arc::new(MockTransferTool::new());
    let signer: Arc<dyn MessageSigner> = if signed {
        Arc::new(Ed25519Signer::generate())
    } else {
        Arc::new(NoopSigner)
    };

    let buyer = BuyerAgent::new(
        AgentId::from("buyer-1"),
        Arc::clone(&topic) as Arc<dyn Topic>,
        Arc::clone(&tool) as Arc<dyn TransferTool>,
        Arc::clone(&signer),
        buyer_policy,
        AgentId::from("payment-1"),
        "native",
        100,
    );
    let seller = SellerAgent::new(
        AgentId::from("seller-1"),
        Arc::clone(&topic) as Arc<dyn Topic>,
        Arc::clone(&tool) as Arc<dyn TransferTool>,
        Arc::clone(&signer),
        seller_policy,
        100,
    );
    let payment = PaymentAgent::new(
        AgentId::from("payment-1"),
        Arc::clone(&topic) as Arc<dyn Topic>,
        Arc::clone(&tool) as Arc<dyn TransferTool>,
        signer,
        PaymentConfig::default(),
        100,
    );
    Market {
        topic,
        tool,
        buyer,
        seller,
        payment,
    }
}

async fn start_all(m: &Market) {
    m.payment.start().await.unwrap();
    m.seller.start().await.unwrap();
    m.buyer.start().await.unwrap();
}

async fn stop_all(m: &Market) {
    m.buyer.stop().await;
    m.seller.stop().await;
    m.payment.stop().await;
}

/// Poll until the conversation reaches `state` or the deadline passes.
async fn wait_for_state(ctx: &AgentContext, correlation_id: &str, state: &str) {
    for _ in 0..100 {
        if ctx.conversation(correlation_id).state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "conversation {} never reached '{}' (stuck at '{}')",
        correlation_id,
        state,
        ctx.conversation(correlation_id).state
    );
}

#[tokio::test]
async fn test_negotiation_converges_and_settles() {
    let m = market(
        BuyerPolicy {
            max_price: 90.0,
            auto_accept_threshold: 1.1,
            payment_account: "0.0.2001".to_string(),
        },
        SellerPolicy {
            min_price: 50.0,
            ideal_price: 80.0,
            inventory: HashMap::from([("widgets".to_string(), 10)]),
        },
        true,
    );
    start_all(&m).await;

    // 75 is between min and ideal: the seller counters at 77.5, which is
    // inside the buyer's tolerance band (90 × 1.1), so the deal closes.
    let corr = m
        .buyer
        .start_negotiation(&AgentId::from("seller-1"), "widgets", 2, 75.0, "USD")
        .await
        .unwrap();

    wait_for_state(m.buyer.context(), &corr, "paid").await;

    let calls = m.tool.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].amount, 155.0);
    assert_eq!(calls[0].to_account, "0.0.2001");
    assert!(calls[0].memo.contains("widgets"));

    assert_eq!(m.seller.available("widgets"), 8);
    let seller_view = m.seller.context().conversation(&corr);
    assert_eq!(seller_view.state, "accepted");
    assert_eq!(seller_view.agreed_price, Some(77.5));
    assert_eq!(
        m.payment.context().conversation(&corr).state,
        "payment_complete"
    );

    stop_all(&m).await;
}

#[tokio::test]
async fn test_long_haggle_accepted_within_budget() {
    // Tolerance is effectively disabled (80 × 0.5 = 40 caps nothing the
    // seller would send), so the deal can only close through the
    // within-budget accept after three exchanges.
    let m = market(
        BuyerPolicy {
            max_price: 80.0,
            auto_accept_threshold: 0.5,
            payment_account: "0.0.2001".to_string(),
        },
        SellerPolicy {
            min_price: 50.0,
            ideal_price: 82.0,
            inventory: HashMap::from([("widgets".to_string(), 10)]),
        },
        false,
    );
    start_all(&m).await;

    // 60 → seller counters 71 → buyer counters 65.5 → seller counters
    // 73.75, which the worn-down buyer takes (73.75 ≤ 80, 4th exchange).
    let corr = m
        .buyer
        .start_negotiation(&AgentId::from("seller-1"), "widgets", 2, 60.0, "USD")
        .await
        .unwrap();

    wait_for_state(m.buyer.context(), &corr, "paid").await;

    let buyer_view = m.buyer.context().conversation(&corr);
    assert_eq!(buyer_view.agreed_price, Some(73.75));
    assert!(buyer_view.exchanges >= 4);

    let calls = m.tool.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].amount, 147.5);
    assert_eq!(m.seller.available("widgets"), 8);

    stop_all(&m).await;
}

#[tokio::test]
async fn test_lowball_offer_is_declined() {
    let m = market(
        BuyerPolicy {
            max_price: 40.0,
            auto_accept_threshold: 1.0,
            payment_account: "0.0.2001".to_string(),
        },
        SellerPolicy {
            min_price: 50.0,
            ideal_price: 80.0,
            inventory: HashMap::from([("widgets".to_string(), 10)]),
        },
        false,
    );
    start_all(&m).await;

    let corr = m
        .buyer
        .start_negotiation(&AgentId::from("seller-1"), "widgets", 2, 30.0, "USD")
        .await
        .unwrap();

    wait_for_state(m.buyer.context(), &corr, "declined").await;
    assert_eq!(m.tool.call_count(), 0);
    assert_eq!(m.seller.available("widgets"), 10);

    stop_all(&m).await;
}

#[tokio::test]
async fn test_insufficient_inventory_never_reserves() {
    let m = market(
        BuyerPolicy::default(),
        SellerPolicy {
            min_price: 50.0,
            ideal_price: 80.0,
            inventory: HashMap::from([("widgets".to_string(), 1)]),
        },
        false,
    );
    start_all(&m).await;

    let corr = m
        .buyer
        .start_negotiation(&AgentId::from("seller-1"), "widgets", 5, 85.0, "USD")
        .await
        .unwrap();

    wait_for_state(m.buyer.context(), &corr, "declined").await;
    assert_eq!(m.seller.available("widgets"), 1);
    assert_eq!(m.tool.call_count(), 0);

    stop_all(&m).await;
}

#[tokio::test]
async fn test_redelivered_log_causes_no_double_settlement() {
    let m = market(
        BuyerPolicy {
            max_price: 90.0,
            auto_accept_threshold: 1.1,
            payment_account: "0.0.2001".to_string(),
        },
        SellerPolicy {
            min_price: 50.0,
            ideal_price: 80.0,
            inventory: HashMap::from([("widgets".to_string(), 10)]),
        },
        false,
    );
    start_all(&m).await;

    let corr = m
        .buyer
        .start_negotiation(&AgentId::from("seller-1"), "widgets", 2, 75.0, "USD")
        .await
        .unwrap();
    wait_for_state(m.buyer.context(), &corr, "paid").await;

    // At-least-once delivery: replay the entire log and verify nothing
    // settles twice and no inventory is reserved again.
    for index in 0..m.topic.len() {
        m.topic.redeliver(index);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(m.tool.call_count(), 1);
    assert_eq!(m.seller.available("widgets"), 8);
    assert_eq!(m.buyer.context().conversation(&corr).state, "paid");

    stop_all(&m).await;
}
