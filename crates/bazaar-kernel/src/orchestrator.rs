//! Wires the six agents into one system over a shared topic.
//!
//! The orchestrator holds no protocol logic: it constructs agents from
//! configuration, starts and stops them as a group, snapshots their state,
//! and funnels every agent's observability events into one stream so an
//! embedding application needs a single subscription.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use bazaar_agents::runtime::AgentEvent;
use bazaar_agents::{
    AgentContext, AgentError, AgentState, BridgeAgent, BuyerAgent, DecisionAgent, PaymentAgent,
    SellerAgent, TelegramAgent,
};
use bazaar_types::config::SystemConfig;
use bazaar_types::message::AgentId;
use bazaar_types::signing::MessageSigner;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::TransferTool;

/// Well-known agent ids within one system instance.
pub mod ids {
    pub const BUYER: &str = "buyer-agent";
    pub const SELLER: &str = "seller-agent";
    pub const PAYMENT: &str = "payment-agent";
    pub const TELEGRAM: &str = "telegram-agent";
    pub const DECISION: &str = "decision-agent";
    pub const BRIDGE: &str = "bridge-agent";
}

/// Snapshot of one agent's state.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub id: AgentId,
    pub state: AgentState,
    pub conversations: usize,
}

/// Snapshot of the whole system.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub agents: Vec<AgentStatus>,
    pub pending_executions: usize,
    pub pending_notifications: usize,
}

impl SystemStatus {
    /// True when every agent is running.
    pub fn all_running(&self) -> bool {
        self.agents.iter().all(|a| a.state == AgentState::Running)
    }
}

/// The assembled agent mesh.
pub struct AgentSystem {
    buyer: BuyerAgent,
    seller: SellerAgent,
    payment: PaymentAgent,
    telegram: TelegramAgent,
    decision: DecisionAgent,
    bridge: BridgeAgent,
    events: broadcast::Sender<AgentEvent>,
    forwarders: Vec<tokio::task::JoinHandle<()>>,
}

impl AgentSystem {
    /// Construct all agents from `config` over the shared `topic`.
    pub fn new(
        config: &SystemConfig,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
    ) -> Self {
        let cap = config.dedup_capacity;
        let buyer = BuyerAgent::new(
            AgentId::from(ids::BUYER),
            Arc::clone(&topic),
            Arc::clone(&transfer),
            Arc::clone(&signer),
            config.buyer.clone(),
            AgentId::from(ids::PAYMENT),
            config.payment.token_id.clone(),
            cap,
        );
        let seller = SellerAgent::new(
            AgentId::from(ids::SELLER),
            Arc::clone(&topic),
            Arc::clone(&transfer),
            Arc::clone(&signer),
            config.seller.clone(),
            cap,
        );
        let payment = PaymentAgent::new(
            AgentId::from(ids::PAYMENT),
            Arc::clone(&topic),
            Arc::clone(&transfer),
            Arc::clone(&signer),
            config.payment.clone(),
            cap,
        );
        let telegram = TelegramAgent::new(
            AgentId::from(ids::TELEGRAM),
            Arc::clone(&topic),
            Arc::clone(&transfer),
            Arc::clone(&signer),
            AgentId::from(ids::DECISION),
            cap,
        );
        let decision = DecisionAgent::new(
            AgentId::from(ids::DECISION),
            Arc::clone(&topic),
            Arc::clone(&transfer),
            Arc::clone(&signer),
            config.decision.clone(),
            AgentId::from(ids::BRIDGE),
            cap,
        );
        let bridge = BridgeAgent::new(
            AgentId::from(ids::BRIDGE),
            topic,
            transfer,
            signer,
            config.bridge.clone(),
            cap,
        );

        let (events, _) = broadcast::channel(1024);
        Self {
            buyer,
            seller,
            payment,
            telegram,
            decision,
            bridge,
            events,
            forwarders: Vec::new(),
        }
    }

    /// Start every agent. Responders start before initiators so no early
    /// message lands on a topic nobody reads.
    pub async fn start_all(&mut self) -> Result<(), AgentError> {
        // Forwarders attach first so the Started events themselves reach
        // the aggregate stream.
        for ctx in self.contexts() {
            self.forward_events(&ctx);
        }

        self.bridge.start().await?;
        self.decision.start().await?;
        self.payment.start().await?;
        self.seller.start().await?;
        self.telegram.start().await?;
        self.buyer.start().await?;

        info!("Agent system started");
        Ok(())
    }

    /// Stop every agent and the event forwarders.
    pub async fn stop_all(&mut self) {
        self.buyer.stop().await;
        self.telegram.stop().await;
        self.seller.stop().await;
        self.payment.stop().await;
        self.decision.stop().await;
        self.bridge.stop().await;
        for task in self.forwarders.drain(..) {
            task.abort();
        }
        info!("Agent system stopped");
    }

    /// Subscribe to the merged event stream of all agents.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Snapshot every agent plus the cross-agent counters.
    pub fn status(&self) -> SystemStatus {
        let agents = self
            .contexts()
            .into_iter()
            .map(|ctx| AgentStatus {
                id: ctx.id().clone(),
                state: ctx.state(),
                conversations: ctx.conversation_count(),
            })
            .collect();
        SystemStatus {
            agents,
            pending_executions: self.bridge.pending_executions().len(),
            pending_notifications: self.telegram.all_notifications().len(),
        }
    }

    pub fn buyer(&self) -> &BuyerAgent {
        &self.buyer
    }

    pub fn seller(&self) -> &SellerAgent {
        &self.seller
    }

    pub fn payment(&self) -> &PaymentAgent {
        &self.payment
    }

    pub fn telegram(&self) -> &TelegramAgent {
        &self.telegram
    }

    pub fn decision(&self) -> &DecisionAgent {
        &self.decision
    }

    pub fn bridge(&self) -> &BridgeAgent {
        &self.bridge
    }

    fn contexts(&self) -> Vec<AgentContext> {
        vec![
            self.buyer.context().clone(),
            self.seller.context().clone(),
            self.payment.context().clone(),
            self.telegram.context().clone(),
            self.decision.context().clone(),
            self.bridge.context().clone(),
        ]
    }

    fn forward_events(&mut self, ctx: &AgentContext) {
        let mut rx = ctx.subscribe_events();
        let tx = self.events.clone();
        self.forwarders.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    // A slow aggregate consumer loses events, not liveness.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }
}
