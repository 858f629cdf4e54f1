//! Payment agent — idempotent settlement of accepted deals.
//!
//! A payment request is identified by `(correlationId, amount, toAccount)`.
//! At-least-once delivery can duplicate the request; a key already in the
//! processed set means the first acknowledgement was already sent, so the
//! duplicate is ignored outright. Every request that survives dedup gets
//! exactly one acknowledgement, success or failure. Transfer failures are
//! data in the ack, never an error out of the handler, and they do not mark
//! the key processed, so a retried request can still settle.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use bazaar_types::config::PaymentConfig;
use bazaar_types::message::{
    AgentId, ExecStatus, Message, MessageBody, PaymentReceipt, PaymentRequest,
};
use bazaar_types::signing::MessageSigner;
use bazaar_types::BoundedSet;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::TransferTool;

use crate::runtime::{reply_to, AgentContext, AgentError, AgentRuntime, Behavior};

/// Settles payment requests through the transfer tool.
pub struct PaymentAgent {
    runtime: AgentRuntime,
    config: PaymentConfig,
}

impl PaymentAgent {
    /// Create a stopped payment agent.
    pub fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
        config: PaymentConfig,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, topic, transfer, signer, dedup_capacity),
            config,
        }
    }

    /// Start the dispatch loop.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.runtime
            .start(Box::new(PaymentBehavior {
                processed: BoundedSet::new(self.config.processed_capacity),
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

struct PaymentBehavior {
    processed: BoundedSet,
}

/// Composite idempotency key for one settlement.
fn payment_key(correlation_id: &str, request: &PaymentRequest) -> String {
    format!(
        "{}|{}|{}",
        correlation_id, request.amount, request.to_account
    )
}

impl PaymentBehavior {
    async fn settle(
        &mut self,
        ctx: &AgentContext,
        message: &Message,
        request: &PaymentRequest,
    ) -> Result<(), AgentError> {
        let key = payment_key(&message.correlation_id, request);
        if self.processed.contains(&key) {
            warn!(
                agent = %ctx.id(),
                correlation_id = %message.correlation_id,
                amount = request.amount,
                "Duplicate payment request ignored"
            );
            return Ok(());
        }

        match ctx
            .execute_transfer(
                &request.to_account,
                request.amount,
                &request.token_id,
                &request.memo,
            )
            .await
        {
            Ok(receipt) => {
                self.processed.insert(key);
                ctx.set_conversation_state(&message.correlation_id, "payment_complete");
                info!(
                    agent = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    transaction_id = %receipt.transaction_id,
                    amount = request.amount,
                    "Payment settled"
                );
                ctx.send_message(reply_to(
                    ctx,
                    message,
                    MessageBody::PaymentAck(PaymentReceipt {
                        transaction_id: receipt.transaction_id,
                        status: ExecStatus::Success,
                        amount: request.amount,
                        token_id: request.token_id.clone(),
                        timestamp: Utc::now(),
                        error: None,
                    }),
                ))
                .await
            }
            Err(e) => {
                // Failure crosses the agent boundary as data, not as an error.
                warn!(
                    agent = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    error = %e,
                    "Payment failed"
                );
                ctx.set_conversation_state(&message.correlation_id, "payment_failed");
                ctx.send_message(reply_to(
                    ctx,
                    message,
                    MessageBody::PaymentAck(PaymentReceipt {
                        transaction_id: String::new(),
                        status: ExecStatus::Failed,
                        amount: request.amount,
                        token_id: request.token_id.clone(),
                        timestamp: Utc::now(),
                        error: Some(e.to_string()),
                    }),
                ))
                .await
            }
        }
    }
}

#[async_trait]
impl Behavior for PaymentBehavior {
    async fn on_message(&mut self, ctx: &AgentContext, message: Message) -> Result<(), AgentError> {
        match &message.body {
            MessageBody::PaymentReq(request) => {
                let request = request.clone();
                self.settle(ctx, &message, &request).await
            }
            other => {
                debug!(agent = %ctx.id(), kind = other.kind(), "Ignoring message type");
                Ok(())
            }
        }
    }
}
