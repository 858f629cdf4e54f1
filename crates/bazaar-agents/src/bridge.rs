//! Bridge-executor agent — tracks bridge executions, never runs them alone.
//!
//! A BRIDGE_EXEC_REQ only records a pending execution; actually moving funds
//! requires an external confirmation step surfaced through
//! [`BridgeAgent::mark_execution_started`] and
//! [`BridgeAgent::complete_bridge_execution`]. Completion is the single
//! deletion in the data model: the record leaves the pending map and lands
//! on the append-only history list, and exactly one BRIDGE_EXEC_RESP goes
//! back to whoever requested the execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bazaar_types::config::BridgeConfig;
use bazaar_types::message::{
    AgentId, BridgeOutcome, BridgeRequest, ExecStatus, Message, MessageBody,
};
use bazaar_types::signing::MessageSigner;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::TransferTool;

use crate::runtime::{AgentContext, AgentError, AgentRuntime, Behavior};

/// Lifecycle of one tracked bridge execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Recorded, awaiting external confirmation.
    Pending,
    /// Confirmation received, transaction in flight.
    Executing,
    /// Completed successfully.
    Success,
    /// Completed with a failure.
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One tracked bridge execution, keyed by correlation id.
#[derive(Debug, Clone)]
pub struct PendingExecution {
    pub correlation_id: String,
    pub source_chain: String,
    pub target_chain: String,
    pub token: String,
    pub amount: f64,
    pub recipient: Option<String>,
    pub status: ExecutionStatus,
    pub transaction_hash: Option<String>,
    pub error: Option<String>,
    /// Agent to receive the BRIDGE_EXEC_RESP on completion.
    pub requested_by: AgentId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct BridgeStore {
    pending: DashMap<String, PendingExecution>,
    history: Mutex<Vec<PendingExecution>>,
}

/// Records and completes human-confirmed bridge executions.
pub struct BridgeAgent {
    runtime: AgentRuntime,
    config: BridgeConfig,
    store: Arc<BridgeStore>,
}

impl BridgeAgent {
    /// Create a stopped bridge executor.
    pub fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
        config: BridgeConfig,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, topic, transfer, signer, dedup_capacity),
            config,
            store: Arc::new(BridgeStore::default()),
        }
    }

    /// Start the dispatch loop.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.runtime
            .start(Box::new(BridgeBehavior {
                store: Arc::clone(&self.store),
            }))
            .await
    }

    /// Stop the dispatch loop.
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    /// Shared context (state, conversations, events).
    pub fn context(&self) -> &AgentContext {
        self.runtime.context()
    }

    /// The pending execution for `correlation_id`, if one is tracked.
    pub fn pending_execution(&self, correlation_id: &str) -> Option<PendingExecution> {
        self.store.pending.get(correlation_id).map(|e| e.clone())
    }

    /// All executions still awaiting completion.
    pub fn pending_executions(&self) -> Vec<PendingExecution> {
        self.store.pending.iter().map(|e| e.clone()).collect()
    }

    /// Completed executions, oldest first.
    pub fn execution_history(&self) -> Vec<PendingExecution> {
        self.store
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// External confirmation arrived: move pending → executing and attach
    /// the transaction hash. No-op when nothing is pending under this id.
    pub fn mark_execution_started(&self, correlation_id: &str, transaction_hash: &str) {
        let Some(mut entry) = self.store.pending.get_mut(correlation_id) else {
            warn!(
                agent = %self.runtime.context().id(),
                correlation_id,
                "mark_execution_started: no pending execution"
            );
            return;
        };
        if entry.status != ExecutionStatus::Pending {
            return;
        }
        entry.status = ExecutionStatus::Executing;
        entry.transaction_hash = Some(transaction_hash.to_string());
        entry.updated_at = Utc::now();
        info!(
            agent = %self.runtime.context().id(),
            correlation_id,
            transaction_hash,
            "Bridge execution started"
        );
    }

    /// Finish a tracked execution: move it to history, update the
    /// conversation, and send the BRIDGE_EXEC_RESP to the requester.
    ///
    /// No-op returning `Ok` when nothing is pending under this id, so a
    /// doubled confirmation cannot produce a second response.
    pub async fn complete_bridge_execution(
        &self,
        correlation_id: &str,
        transaction_hash: Option<&str>,
        status: ExecStatus,
        error: Option<&str>,
    ) -> Result<(), AgentError> {
        let Some((_, mut record)) = self.store.pending.remove(correlation_id) else {
            warn!(
                agent = %self.runtime.context().id(),
                correlation_id,
                "complete_bridge_execution: no pending execution"
            );
            return Ok(());
        };

        record.status = match status {
            ExecStatus::Success => ExecutionStatus::Success,
            ExecStatus::Failed => ExecutionStatus::Failed,
        };
        if let Some(hash) = transaction_hash {
            record.transaction_hash = Some(hash.to_string());
        }
        record.error = error.map(String::from);
        record.updated_at = Utc::now();

        let ctx = self.runtime.context();
        ctx.set_conversation_state(
            correlation_id,
            match status {
                ExecStatus::Success => "completed",
                ExecStatus::Failed => "failed",
            },
        );
        info!(
            agent = %ctx.id(),
            correlation_id,
            status = %record.status,
            "Bridge execution completed"
        );

        let outcome = BridgeOutcome {
            status,
            timestamp: Utc::now(),
            transaction_hash: record.transaction_hash.clone(),
            error: record.error.clone(),
        };
        let requester = record.requested_by.clone();
        self.store
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);

        ctx.send_message(Message::new_in(
            correlation_id.to_string(),
            ctx.id().clone(),
            requester,
            MessageBody::BridgeExecResp(outcome),
        ))
        .await
    }

    /// Demo/testing aid: synthesize a transaction hash, run the normal
    /// start + complete sequence after a fixed delay.
    pub async fn simulate_bridge_execution(&self, correlation_id: &str) -> Result<(), AgentError> {
        let hash = format!("0x{}", Uuid::new_v4().simple());
        self.mark_execution_started(correlation_id, &hash);
        tokio::time::sleep(Duration::from_millis(self.config.simulate_delay_ms)).await;
        self.complete_bridge_execution(correlation_id, Some(&hash), ExecStatus::Success, None)
            .await
    }
}

struct BridgeBehavior {
    store: Arc<BridgeStore>,
}

#[async_trait]
impl Behavior for BridgeBehavior {
    async fn on_message(&mut self, ctx: &AgentContext, message: Message) -> Result<(), AgentError> {
        match &message.body {
            MessageBody::BridgeExecReq(request) => {
                self.record(ctx, &message, request);
                Ok(())
            }
            other => {
                debug!(agent = %ctx.id(), kind = other.kind(), "Ignoring message type");
                Ok(())
            }
        }
    }
}

impl BridgeBehavior {
    fn record(&self, ctx: &AgentContext, message: &Message, request: &BridgeRequest) {
        if self.store.pending.contains_key(&message.correlation_id) {
            warn!(
                agent = %ctx.id(),
                correlation_id = %message.correlation_id,
                "Execution already pending; request ignored"
            );
            return;
        }
        let now = Utc::now();
        self.store.pending.insert(
            message.correlation_id.clone(),
            PendingExecution {
                correlation_id: message.correlation_id.clone(),
                source_chain: request.source_chain.clone(),
                target_chain: request.target_chain.clone(),
                token: request.token.clone(),
                amount: request.amount,
                recipient: request.recipient.clone(),
                status: ExecutionStatus::Pending,
                transaction_hash: None,
                error: None,
                requested_by: message.from.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        ctx.set_conversation_state(&message.correlation_id, "pending_confirmation");
        info!(
            agent = %ctx.id(),
            correlation_id = %message.correlation_id,
            source = %request.source_chain,
            target = %request.target_chain,
            amount = request.amount,
            "Bridge execution recorded, awaiting confirmation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_types::signing::NoopSigner;
    use bazaar_wire::codec::{decode_message, encode_message};
    use bazaar_wire::topic::MemoryTopic;
    use bazaar_wire::transfer::MockTransferTool;

    fn agent(topic: &Arc<MemoryTopic>) -> BridgeAgent {
        BridgeAgent::new(
            AgentId::from("bridge-1"),
            Arc::clone(topic) as Arc<dyn Topic>,
            Arc::new(MockTransferTool::new()),
            Arc::new(NoopSigner),
            BridgeConfig {
                simulate_delay_ms: 10,
            },
            100,
        )
    }

    fn exec_req() -> Message {
        Message::new(
            AgentId::from("decision-1"),
            AgentId::from("bridge-1"),
            MessageBody::BridgeExecReq(BridgeRequest {
                source_chain: "ethereum".to_string(),
                target_chain: "polygon".to_string(),
                token: "USDC".to_string(),
                amount: 100.0,
                recipient: None,
            }),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_request_records_pending_without_executing() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        agent.start().await.unwrap();

        let req = exec_req();
        topic.publish(encode_message(&req).unwrap()).await.unwrap();
        settle().await;

        let pending = agent.pending_execution(&req.correlation_id).unwrap();
        assert_eq!(pending.status, ExecutionStatus::Pending);
        assert!(pending.transaction_hash.is_none());
        assert!(agent.execution_history().is_empty());
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_start_then_complete_moves_to_history_and_responds() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        let mut sub = topic.subscribe().await.unwrap();
        agent.start().await.unwrap();

        let req = exec_req();
        topic.publish(encode_message(&req).unwrap()).await.unwrap();
        settle().await;

        agent.mark_execution_started(&req.correlation_id, "0xfeed");
        assert_eq!(
            agent
                .pending_execution(&req.correlation_id)
                .unwrap()
                .status,
            ExecutionStatus::Executing
        );

        agent
            .complete_bridge_execution(&req.correlation_id, Some("0xfeed"), ExecStatus::Success, None)
            .await
            .unwrap();

        assert!(agent.pending_execution(&req.correlation_id).is_none());
        let history = agent.execution_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Success);
        assert_eq!(history[0].transaction_hash.as_deref(), Some("0xfeed"));

        // Exactly one response, addressed to the requester.
        let mut responses = Vec::new();
        while let Ok(Some(delivery)) =
            tokio::time::timeout(Duration::from_millis(200), sub.recv()).await
        {
            let msg = decode_message(&delivery.payload).unwrap();
            if let MessageBody::BridgeExecResp(outcome) = &msg.body {
                assert_eq!(msg.to, AgentId::from("decision-1").into());
                assert_eq!(outcome.status, ExecStatus::Success);
                responses.push(msg.clone());
            }
        }
        assert_eq!(responses.len(), 1);
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_failed_completion_carries_error() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        agent.start().await.unwrap();

        let req = exec_req();
        topic.publish(encode_message(&req).unwrap()).await.unwrap();
        settle().await;

        agent
            .complete_bridge_execution(
                &req.correlation_id,
                None,
                ExecStatus::Failed,
                Some("insufficient liquidity"),
            )
            .await
            .unwrap();

        let history = agent.execution_history();
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert_eq!(history[0].error.as_deref(), Some("insufficient liquidity"));
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_lifecycle_calls_without_pending_are_noops() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        agent.start().await.unwrap();

        agent.mark_execution_started("nope", "0x0");
        agent
            .complete_bridge_execution("nope", None, ExecStatus::Success, None)
            .await
            .unwrap();
        assert!(agent.execution_history().is_empty());
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_simulation_runs_full_sequence() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        agent.start().await.unwrap();

        let req = exec_req();
        topic.publish(encode_message(&req).unwrap()).await.unwrap();
        settle().await;

        agent
            .simulate_bridge_execution(&req.correlation_id)
            .await
            .unwrap();
        let history = agent.execution_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Success);
        assert!(history[0]
            .transaction_hash
            .as_deref()
            .unwrap()
            .starts_with("0x"));
        agent.stop().await;
    }
}
