//! Buyer agent — opens negotiations and evaluates counter-offers.
//!
//! Per-conversation state machine:
//! `offer_sent → {counter_sent ⇄ seller reply} → accepted →
//! payment_requested → paid | payment_failed`.
//!
//! Counter evaluation, in order: accept within the overrun tolerance
//! (`max_price × auto_accept_threshold`); accept within budget once the
//! conversation has gone at least three messages (negotiation fatigue);
//! counter at the midpoint between our last offer and theirs when the
//! midpoint fits the budget; otherwise decline citing the budget.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use bazaar_types::config::BuyerPolicy;
use bazaar_types::message::{
    AcceptTerms, AgentId, CounterTerms, ExecStatus, Message, MessageBody, PaymentRequest,
    TradeTerms,
};
use bazaar_types::signing::MessageSigner;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::TransferTool;

use crate::runtime::{reply_to, AgentContext, AgentError, AgentRuntime, Behavior};

/// The buying side of a negotiation.
pub struct BuyerAgent {
    runtime: AgentRuntime,
    policy: BuyerPolicy,
    payment_agent: AgentId,
    token_id: String,
}

impl BuyerAgent {
    /// Create a stopped buyer.
    pub fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
        policy: BuyerPolicy,
        payment_agent: AgentId,
        token_id: impl Into<String>,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, topic, transfer, signer, dedup_capacity),
            policy,
            payment_agent,
            token_id: token_id.into(),
        }
    }

    /// Start the dispatch loop.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.runtime
            .start(Box::new(BuyerBehavior {
                policy: self.policy.clone(),
                payment_agent: self.payment_agent.clone(),
                token_id: self.token_id.clone(),
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

    /// Open a negotiation with `seller`. Returns the correlation id of the
    /// new conversation. Fire-and-forget: replies arrive via dispatch.
    pub async fn start_negotiation(
        &self,
        seller: &AgentId,
        item: impl Into<String>,
        qty: u32,
        opening_price: f64,
        currency: impl Into<String>,
    ) -> Result<String, AgentError> {
        let terms = TradeTerms {
            item: item.into(),
            qty,
            unit_price: opening_price,
            currency: currency.into(),
        };
        let msg = Message::new(
            self.context().id().clone(),
            seller.clone(),
            MessageBody::Offer(terms.clone()),
        );
        let correlation_id = msg.correlation_id.clone();

        self.context().update_conversation(&correlation_id, |c| {
            c.state = "offer_sent".to_string();
            c.item = Some(terms.item.clone());
            c.qty = Some(terms.qty);
            c.last_offer_price = Some(terms.unit_price);
            c.exchanges = 1;
        });
        info!(
            buyer = %self.context().id(),
            seller = %seller,
            item = %terms.item,
            qty,
            opening_price,
            "Opening negotiation"
        );
        self.context().send_message(msg).await?;
        Ok(correlation_id)
    }
}

struct BuyerBehavior {
    policy: BuyerPolicy,
    payment_agent: AgentId,
    token_id: String,
}

impl BuyerBehavior {
    /// Accept the counterparty's terms and request settlement.
    async fn accept_and_pay(
        &self,
        ctx: &AgentContext,
        message: &Message,
        terms: TradeTerms,
    ) -> Result<(), AgentError> {
        let accept = AcceptTerms::new(terms);
        ctx.update_conversation(&message.correlation_id, |c| {
            c.state = "accepted".to_string();
            c.agreed_price = Some(accept.terms.unit_price);
            c.exchanges += 1;
        });
        ctx.send_message(reply_to(ctx, message, MessageBody::Accept(accept.clone())))
            .await?;
        self.request_payment(ctx, &message.correlation_id, &accept)
            .await
    }

    /// Fire-and-forget settlement request; completion arrives as a
    /// PAYMENT_ACK on a later dispatch iteration.
    async fn request_payment(
        &self,
        ctx: &AgentContext,
        correlation_id: &str,
        accept: &AcceptTerms,
    ) -> Result<(), AgentError> {
        let request = PaymentRequest {
            amount: accept.total_amount,
            token_id: self.token_id.clone(),
            to_account: self.policy.payment_account.clone(),
            memo: format!(
                "Purchase of {} {} at {} {}/unit",
                accept.terms.qty, accept.terms.item, accept.terms.unit_price, accept.terms.currency
            ),
            item: accept.terms.item.clone(),
            qty: accept.terms.qty,
        };
        let msg = Message::new_in(
            correlation_id.to_string(),
            ctx.id().clone(),
            self.payment_agent.clone(),
            MessageBody::PaymentReq(request),
        );
        ctx.set_conversation_state(correlation_id, "payment_requested");
        ctx.send_message(msg).await
    }

    async fn handle_counter(
        &self,
        ctx: &AgentContext,
        message: &Message,
        counter: &CounterTerms,
    ) -> Result<(), AgentError> {
        let conversation = ctx.conversation(&message.correlation_id);
        let exchanges = conversation.exchanges + 1; // including this counter
        ctx.update_conversation(&message.correlation_id, |c| c.exchanges += 1);

        let counter_price = counter.terms.unit_price;
        let tolerance_cap = self.policy.max_price * self.policy.auto_accept_threshold;

        if counter_price <= tolerance_cap {
            debug!(counter_price, tolerance_cap, "Counter within tolerance, accepting");
            return self.accept_and_pay(ctx, message, counter.terms.clone()).await;
        }

        // Negotiation fatigue: within budget after enough back-and-forth.
        if counter_price <= self.policy.max_price && exchanges >= 3 {
            debug!(counter_price, exchanges, "Within budget after long haggle, accepting");
            return self.accept_and_pay(ctx, message, counter.terms.clone()).await;
        }

        let last_offer = conversation.last_offer_price.unwrap_or(counter_price);
        let midpoint = (last_offer + counter_price) / 2.0;
        if midpoint <= self.policy.max_price {
            let revised = TradeTerms {
                unit_price: midpoint,
                ..counter.terms.clone()
            };
            ctx.update_conversation(&message.correlation_id, |c| {
                c.state = "counter_sent".to_string();
                c.last_offer_price = Some(midpoint);
                c.exchanges += 1;
            });
            return ctx
                .send_message(reply_to(
                    ctx,
                    message,
                    MessageBody::Counter(CounterTerms {
                        terms: revised,
                        reason: format!("Meeting you in the middle at {midpoint}"),
                    }),
                ))
                .await;
        }

        ctx.set_conversation_state(&message.correlation_id, "declined");
        ctx.send_message(reply_to(
            ctx,
            message,
            MessageBody::Decline {
                reason: format!(
                    "Counter of {counter_price} exceeds our budget of {}",
                    self.policy.max_price
                ),
            },
        ))
        .await
    }
}

#[async_trait]
impl Behavior for BuyerBehavior {
    async fn on_message(&mut self, ctx: &AgentContext, message: Message) -> Result<(), AgentError> {
        match &message.body {
            MessageBody::Counter(counter) => self.handle_counter(ctx, &message, counter).await,
            MessageBody::Accept(accept) => {
                info!(
                    buyer = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    unit_price = accept.terms.unit_price,
                    total = accept.total_amount,
                    "Seller accepted"
                );
                ctx.update_conversation(&message.correlation_id, |c| {
                    c.state = "accepted".to_string();
                    c.agreed_price = Some(accept.terms.unit_price);
                    c.exchanges += 1;
                });
                self.request_payment(ctx, &message.correlation_id, accept)
                    .await
            }
            MessageBody::Decline { reason } => {
                info!(
                    buyer = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    reason = %reason,
                    "Seller declined"
                );
                ctx.set_conversation_state(&message.correlation_id, "declined");
                Ok(())
            }
            MessageBody::PaymentAck(receipt) => {
                let state = match receipt.status {
                    ExecStatus::Success => "paid",
                    ExecStatus::Failed => "payment_failed",
                };
                info!(
                    buyer = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    transaction_id = %receipt.transaction_id,
                    state,
                    "Payment acknowledged"
                );
                ctx.set_conversation_state(&message.correlation_id, state);
                Ok(())
            }
            other => {
                debug!(
                    buyer = %ctx.id(),
                    kind = other.kind(),
                    "Ignoring message type"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_types::signing::NoopSigner;
    use bazaar_wire::codec::decode_message;
    use bazaar_wire::topic::MemoryTopic;
    use bazaar_wire::transfer::MockTransferTool;
    use std::time::Duration;

    fn buyer(topic: &Arc<MemoryTopic>, policy: BuyerPolicy) -> BuyerAgent {
        BuyerAgent::new(
            AgentId::from("buyer-1"),
            Arc::clone(topic) as Arc<dyn Topic>,
            Arc::new(MockTransferTool::new()),
            Arc::new(NoopSigner),
            policy,
            AgentId::from("payment-1"),
            "native",
            100,
        )
    }

    async fn drain(sub: &mut bazaar_wire::topic::Subscription) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(Some(delivery)) =
            tokio::time::timeout(Duration::from_millis(200), sub.recv()).await
        {
            out.push(decode_message(&delivery.payload).unwrap());
        }
        out
    }

    fn counter_from_seller(correlation_id: &str, price: f64) -> Message {
        Message::new_in(
            correlation_id.to_string(),
            AgentId::from("seller-1"),
            AgentId::from("buyer-1"),
            MessageBody::Counter(CounterTerms {
                terms: TradeTerms {
                    item: "widgets".to_string(),
                    qty: 2,
                    unit_price: price,
                    currency: "USD".to_string(),
                },
                reason: "our price".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn test_counter_within_tolerance_accepted_and_paid() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = buyer(
            &topic,
            BuyerPolicy {
                max_price: 90.0,
                auto_accept_threshold: 1.1,
                payment_account: "0.0.5".to_string(),
            },
        );
        let mut sub = topic.subscribe().await.unwrap();
        agent.start().await.unwrap();
        let corr = agent
            .start_negotiation(&AgentId::from("seller-1"), "widgets", 2, 75.0, "USD")
            .await
            .unwrap();

        // 77.5 ≤ 90 × 1.1 — accepted on the first counter.
        topic
            .publish(
                bazaar_wire::codec::encode_message(&counter_from_seller(&corr, 77.5)).unwrap(),
            )
            .await
            .unwrap();

        let sent = drain(&mut sub).await;
        let accept = sent.iter().find_map(|m| match &m.body {
            MessageBody::Accept(a) => Some(a.clone()),
            _ => None,
        });
        let accept = accept.expect("buyer should accept");
        assert_eq!(accept.terms.unit_price, 77.5);
        assert_eq!(accept.total_amount, 155.0);

        let pay = sent.iter().find_map(|m| match &m.body {
            MessageBody::PaymentReq(p) => Some(p.clone()),
            _ => None,
        });
        let pay = pay.expect("buyer should request payment");
        assert_eq!(pay.amount, 155.0);
        assert_eq!(
            agent.context().conversation(&corr).state,
            "payment_requested"
        );
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_unaffordable_counter_declined() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = buyer(
            &topic,
            BuyerPolicy {
                max_price: 50.0,
                auto_accept_threshold: 1.0,
                payment_account: "0.0.5".to_string(),
            },
        );
        let mut sub = topic.subscribe().await.unwrap();
        agent.start().await.unwrap();
        let corr = agent
            .start_negotiation(&AgentId::from("seller-1"), "widgets", 2, 20.0, "USD")
            .await
            .unwrap();

        // Midpoint (20 + 200)/2 = 110 > 50 — decline citing the budget.
        topic
            .publish(
                bazaar_wire::codec::encode_message(&counter_from_seller(&corr, 200.0)).unwrap(),
            )
            .await
            .unwrap();

        let sent = drain(&mut sub).await;
        let decline = sent.iter().find_map(|m| match &m.body {
            MessageBody::Decline { reason } => Some(reason.clone()),
            _ => None,
        });
        assert!(decline.expect("buyer should decline").contains("budget"));
        assert_eq!(agent.context().conversation(&corr).state, "declined");
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_midpoint_counter_within_budget() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = buyer(
            &topic,
            BuyerPolicy {
                max_price: 80.0,
                auto_accept_threshold: 0.5, // tolerance disabled for the test
                payment_account: "0.0.5".to_string(),
            },
        );
        let mut sub = topic.subscribe().await.unwrap();
        agent.start().await.unwrap();
        let corr = agent
            .start_negotiation(&AgentId::from("seller-1"), "widgets", 2, 60.0, "USD")
            .await
            .unwrap();

        // Fatigue needs ≥3 exchanges; at 2 the buyer counters at (60+90)/2.
        topic
            .publish(
                bazaar_wire::codec::encode_message(&counter_from_seller(&corr, 90.0)).unwrap(),
            )
            .await
            .unwrap();

        let sent = drain(&mut sub).await;
        // The seller's counter is also on the topic; take the buyer's reply.
        let counter = sent
            .iter()
            .filter(|m| m.from == AgentId::from("buyer-1"))
            .find_map(|m| match &m.body {
                MessageBody::Counter(c) => Some(c.clone()),
                _ => None,
            });
        let reply = counter.expect("buyer should counter");
        assert_eq!(reply.terms.unit_price, 75.0);
        assert_eq!(agent.context().conversation(&corr).state, "counter_sent");
        agent.stop().await;
    }
}
