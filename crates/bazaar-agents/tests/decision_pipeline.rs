//! End-to-end decision pipeline: user text in through the telegram agent,
//! rule-based classification, and human-confirmed bridge execution out.

use std::sync::Arc;
use std::time::Duration;

use bazaar_agents::bridge::ExecutionStatus;
use bazaar_agents::{BridgeAgent, DecisionAgent, TelegramAgent};
use bazaar_types::config::{BridgeConfig, DecisionRules};
use bazaar_types::message::{AgentId, NoticeLevel};
use bazaar_types::signing::NoopSigner;
use bazaar_wire::topic::{MemoryTopic, Topic};
use bazaar_wire::transfer::{MockTransferTool, TransferTool};

struct Pipeline {
    telegram: TelegramAgent,
    decision: DecisionAgent,
    bridge: BridgeAgent,
}

fn pipeline() -> Pipeline {
    let topic = Arc::new(MemoryTopic::new("bazaar.pipeline"));
    let tool = Arc::new(MockTransferTool::new()) as Arc<dyn TransferTool>;
    let signer = Arc::new(NoopSigner);

    let telegram = TelegramAgent::new(
        AgentId::from("telegram-1"),
        Arc::clone(&topic) as Arc<dyn Topic>,
        Arc::clone(&tool),
        signer.clone(),
        AgentId::from("decision-1"),
        100,
    );
    let decision = DecisionAgent::new(
        AgentId::from("decision-1"),
        Arc::clone(&topic) as Arc<dyn Topic>,
        Arc::clone(&tool),
        signer.clone(),
        DecisionRules::default(),
        AgentId::from("bridge-1"),
        100,
    );
    let bridge = BridgeAgent::new(
        AgentId::from("bridge-1"),
        topic as Arc<dyn Topic>,
        tool,
        signer,
        BridgeConfig {
            simulate_delay_ms: 10,
        },
        100,
    );
    Pipeline {
        telegram,
        decision,
        bridge,
    }
}

async fn start_all(p: &Pipeline) {
    p.bridge.start().await.unwrap();
    p.decision.start().await.unwrap();
    p.telegram.start().await.unwrap();
}

async fn stop_all(p: &Pipeline) {
    p.telegram.stop().await;
    p.decision.stop().await;
    p.bridge.stop().await;
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never satisfied");
}

#[tokio::test]
async fn test_approved_request_flows_to_completed_bridge() {
    let p = pipeline();
    start_all(&p).await;

    let corr = p
        .telegram
        .handle_user_message(
            "chat-1",
            "user-1",
            "bridge 100 USDC from ethereum to polygon",
        )
        .await
        .unwrap();

    // The executor records the request but never executes on its own.
    wait_until(|| p.bridge.pending_execution(&corr).is_some()).await;
    assert_eq!(
        p.bridge.pending_execution(&corr).unwrap().status,
        ExecutionStatus::Pending
    );

    // Approval already produced a user-facing notification.
    wait_until(|| !p.telegram.notifications_for("chat-1").is_empty()).await;
    let first = &p.telegram.notifications_for("chat-1")[0];
    assert_eq!(first.level, NoticeLevel::Success);
    assert!(first.text.contains("approved"));

    // External confirmation, modeled by the simulation helper.
    p.bridge.simulate_bridge_execution(&corr).await.unwrap();

    let history = p.bridge.execution_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Success);
    assert!(p.bridge.pending_execution(&corr).is_none());

    // The completion outcome is relayed back to the chat.
    wait_until(|| p.telegram.notifications_for("chat-1").len() >= 2).await;
    let completion = p
        .telegram
        .notifications_for("chat-1")
        .into_iter()
        .find(|n| n.text.contains("completed"))
        .expect("completion notification");
    assert_eq!(completion.level, NoticeLevel::Success);
    assert_eq!(completion.correlation_id, corr);

    stop_all(&p).await;
}

#[tokio::test]
async fn test_rejected_request_notifies_with_reason() {
    let p = pipeline();
    start_all(&p).await;

    let corr = p
        .telegram
        .handle_user_message("chat-2", "user-2", "what is the weather today")
        .await
        .unwrap();

    // One decision response plus one warning notify.
    wait_until(|| p.telegram.notifications_for("chat-2").len() >= 2).await;
    let pending = p.telegram.notifications_for("chat-2");
    assert!(pending.iter().all(|n| n.level == NoticeLevel::Warning));
    assert!(pending.iter().any(|n| n.text.contains("keyword")));
    assert!(pending.iter().all(|n| n.correlation_id == corr));

    assert!(p.bridge.pending_executions().is_empty());
    assert!(p.bridge.execution_history().is_empty());

    stop_all(&p).await;
}

#[tokio::test]
async fn test_unsupported_chain_rejected_with_specific_reason() {
    let p = pipeline();
    start_all(&p).await;

    p.telegram
        .handle_user_message("chat-3", "user-3", "bridge 5 ETH from solana to polygon")
        .await
        .unwrap();

    wait_until(|| !p.telegram.notifications_for("chat-3").is_empty()).await;
    let pending = p.telegram.notifications_for("chat-3");
    assert!(pending
        .iter()
        .any(|n| n.text.contains("Unsupported source chain 'solana'")));
    assert!(p.bridge.pending_executions().is_empty());

    stop_all(&p).await;
}
