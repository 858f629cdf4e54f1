//! Decision agent — deterministic rule pipeline over free-form user text.
//!
//! Not a model: a fixed sequence of checks (keyword, chains, token, amount,
//! optional recipient) where the first failure decides the rejection reason.
//! Every request gets exactly one AI_DECISION_RESP; rejections additionally
//! get one NOTIFY(warning). Approvals forward a BRIDGE_EXEC_REQ to the
//! bridge executor in the same conversation, and the executor's eventual
//! BRIDGE_EXEC_RESP is relayed to the original requester as a NOTIFY.

use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use bazaar_types::config::DecisionRules;
use bazaar_types::message::{
    AgentId, BridgeRequest, Decision, ExecStatus, Message, MessageBody, Notice, NoticeLevel,
    Verdict,
};
use bazaar_types::signing::MessageSigner;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::TransferTool;

use crate::runtime::{AgentContext, AgentError, AgentRuntime, Behavior};

/// Classifies user requests and dispatches approved bridge executions.
pub struct DecisionAgent {
    runtime: AgentRuntime,
    rules: DecisionRules,
    bridge_agent: AgentId,
}

impl DecisionAgent {
    /// Create a stopped decision agent that dispatches to `bridge_agent`.
    pub fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
        rules: DecisionRules,
        bridge_agent: AgentId,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, topic, transfer, signer, dedup_capacity),
            rules,
            bridge_agent,
        }
    }

    /// Start the dispatch loop.
    pub async fn start(&self) -> Result<(), AgentError> {
        let classifier = Classifier::new(self.rules.clone())?;
        self.runtime
            .start(Box::new(DecisionBehavior {
                classifier,
                bridge_agent: self.bridge_agent.clone(),
                requesters: HashMap::new(),
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
}

/// The compiled rule pipeline. Separate from the behavior so it can be
/// exercised directly in tests.
pub(crate) struct Classifier {
    rules: DecisionRules,
    from_chain: Regex,
    to_chain: Regex,
    amount: Regex,
    recipient: Regex,
}

impl Classifier {
    fn new(rules: DecisionRules) -> Result<Self, AgentError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AgentError::Config(format!("bad pattern: {e}")))
        };
        Ok(Self {
            rules,
            from_chain: compile(r"(?i)\bfrom\s+([a-zA-Z]+)")?,
            to_chain: compile(r"(?i)\bto\s+([a-zA-Z]+)")?,
            amount: compile(r"\d+(?:\.\d+)?")?,
            recipient: compile(r"0x[0-9a-fA-F]{40}")?,
        })
    }

    /// Run the checks in order; the first failure is the rejection reason.
    pub(crate) fn classify(&self, text: &str) -> Result<BridgeRequest, String> {
        let lower = text.to_lowercase();

        if !self
            .rules
            .keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
        {
            return Err(format!(
                "No actionable keyword found; expected one of: {}",
                self.rules.keywords.join(", ")
            ));
        }

        let source_chain = self.extract_chain(&self.from_chain, text, "source", "from")?;
        let target_chain = self.extract_chain(&self.to_chain, text, "target", "to")?;

        let token = self
            .rules
            .supported_tokens
            .iter()
            .find(|t| lower.contains(&t.to_lowercase()))
            .cloned()
            .ok_or_else(|| {
                format!(
                    "No supported token mentioned; supported: {}",
                    self.rules.supported_tokens.join(", ")
                )
            })?;

        // The recipient address contains digits; strip it before looking
        // for the amount so hex digits are not misread as a number.
        let recipient = self
            .recipient
            .find(text)
            .map(|m| m.as_str().to_string());
        let without_recipient = match &recipient {
            Some(addr) => text.replace(addr.as_str(), ""),
            None => text.to_string(),
        };
        let amount = self
            .amount
            .find(&without_recipient)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .ok_or_else(|| "No amount found in request".to_string())?;
        if amount <= 0.0 {
            return Err(format!("Amount must be positive, got {amount}"));
        }

        Ok(BridgeRequest {
            source_chain,
            target_chain,
            token,
            amount,
            recipient,
        })
    }

    fn extract_chain(
        &self,
        pattern: &Regex,
        text: &str,
        label: &str,
        preposition: &str,
    ) -> Result<String, String> {
        let captured = pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase());
        match captured {
            None => Err(format!(
                "No {label} chain specified; use '{preposition} <chain>' with one of: {}",
                self.rules.supported_chains.join(", ")
            )),
            Some(chain) if self.rules.supported_chains.contains(&chain) => Ok(chain),
            Some(chain) => Err(format!(
                "Unsupported {label} chain '{chain}'; supported: {}",
                self.rules.supported_chains.join(", ")
            )),
        }
    }
}

struct DecisionBehavior {
    classifier: Classifier,
    bridge_agent: AgentId,
    // correlation id → original requester, for relaying bridge outcomes.
    requesters: HashMap<String, AgentId>,
}

impl DecisionBehavior {
    async fn decide(
        &mut self,
        ctx: &AgentContext,
        message: &Message,
        user_request: &str,
    ) -> Result<(), AgentError> {
        self.requesters
            .insert(message.correlation_id.clone(), message.from.clone());

        match self.classifier.classify(user_request) {
            Ok(params) => {
                info!(
                    agent = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    source = %params.source_chain,
                    target = %params.target_chain,
                    token = %params.token,
                    amount = params.amount,
                    "Request approved"
                );
                ctx.set_conversation_state(&message.correlation_id, "approved");
                let decision = Decision {
                    decision: Verdict::Approve,
                    should_execute_bridge: true,
                    reasoning: format!(
                        "Bridge {} {} from {} to {}",
                        params.amount, params.token, params.source_chain, params.target_chain
                    ),
                    bridge_params: Some(params.clone()),
                };
                ctx.send_message(Message::new_in(
                    message.correlation_id.clone(),
                    ctx.id().clone(),
                    message.from.clone(),
                    MessageBody::AiDecisionResp(decision),
                ))
                .await?;
                ctx.send_message(Message::new_in(
                    message.correlation_id.clone(),
                    ctx.id().clone(),
                    self.bridge_agent.clone(),
                    MessageBody::BridgeExecReq(params),
                ))
                .await
            }
            Err(reason) => {
                info!(
                    agent = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    reason = %reason,
                    "Request rejected"
                );
                ctx.set_conversation_state(&message.correlation_id, "rejected");
                ctx.send_message(Message::new_in(
                    message.correlation_id.clone(),
                    ctx.id().clone(),
                    message.from.clone(),
                    MessageBody::AiDecisionResp(Decision {
                        decision: Verdict::Reject,
                        should_execute_bridge: false,
                        reasoning: reason.clone(),
                        bridge_params: None,
                    }),
                ))
                .await?;
                ctx.send_message(Message::new_in(
                    message.correlation_id.clone(),
                    ctx.id().clone(),
                    message.from.clone(),
                    MessageBody::Notify(Notice::new(reason, NoticeLevel::Warning)),
                ))
                .await
            }
        }
    }

    async fn relay_outcome(
        &mut self,
        ctx: &AgentContext,
        message: &Message,
    ) -> Result<(), AgentError> {
        let MessageBody::BridgeExecResp(outcome) = &message.body else {
            return Ok(());
        };
        let Some(requester) = self.requesters.get(&message.correlation_id).cloned() else {
            debug!(
                agent = %ctx.id(),
                correlation_id = %message.correlation_id,
                "Bridge outcome for unknown conversation"
            );
            return Ok(());
        };
        let notice = match outcome.status {
            ExecStatus::Success => Notice::new(
                format!(
                    "Bridge execution completed: {}",
                    outcome.transaction_hash.as_deref().unwrap_or("(no hash)")
                ),
                NoticeLevel::Success,
            ),
            ExecStatus::Failed => Notice::new(
                format!(
                    "Bridge execution failed: {}",
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
                NoticeLevel::Error,
            ),
        };
        ctx.send_message(Message::new_in(
            message.correlation_id.clone(),
            ctx.id().clone(),
            requester,
            MessageBody::Notify(notice),
        ))
        .await
    }
}

#[async_trait]
impl Behavior for DecisionBehavior {
    async fn on_message(&mut self, ctx: &AgentContext, message: Message) -> Result<(), AgentError> {
        match &message.body {
            MessageBody::AiDecisionReq { user_request, .. } => {
                let user_request = user_request.clone();
                self.decide(ctx, &message, &user_request).await
            }
            MessageBody::BridgeExecResp(_) => self.relay_outcome(ctx, &message).await,
            other => {
                debug!(agent = %ctx.id(), kind = other.kind(), "Ignoring message type");
                Ok(())
            }
        }
    }
}
