//! Seller agent — prices incoming offers against inventory and policy.
//!
//! Evaluation order for an offer/counter at `unit_price`:
//! 1. inventory first — too few units is an immediate decline, and
//!    inventory is never touched for declined or not-yet-accepted deals
//! 2. below `min_price` — decline
//! 3. at or above `ideal_price` — accept immediately
//! 4. otherwise counter at the midpoint `(unit_price + ideal_price) / 2`
//!
//! Inventory is reserved by decrementing exactly once, at accept time
//! (whether we send the ACCEPT or receive the buyer's). Not reversible.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use bazaar_types::config::SellerPolicy;
use bazaar_types::message::{
    AcceptTerms, AgentId, CounterTerms, Message, MessageBody, TradeTerms,
};
use bazaar_types::signing::MessageSigner;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::TransferTool;

use crate::runtime::{reply_to, AgentContext, AgentError, AgentRuntime, Behavior};

/// The selling side of a negotiation.
pub struct SellerAgent {
    runtime: AgentRuntime,
    policy: SellerPolicy,
    inventory: Arc<DashMap<String, u32>>,
}

impl SellerAgent {
    /// Create a stopped seller with the policy's starting inventory.
    pub fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
        policy: SellerPolicy,
        dedup_capacity: usize,
    ) -> Self {
        let inventory = Arc::new(DashMap::new());
        for (item, units) in &policy.inventory {
            inventory.insert(item.clone(), *units);
        }
        Self {
            runtime: AgentRuntime::new(id, topic, transfer, signer, dedup_capacity),
            policy,
            inventory,
        }
    }

    /// Start the dispatch loop.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.runtime
            .start(Box::new(SellerBehavior {
                policy: self.policy.clone(),
                inventory: Arc::clone(&self.inventory),
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

    /// Units currently available for `item`.
    pub fn available(&self, item: &str) -> u32 {
        self.inventory.get(item).map(|n| *n).unwrap_or(0)
    }
}

struct SellerBehavior {
    policy: SellerPolicy,
    inventory: Arc<DashMap<String, u32>>,
}

impl SellerBehavior {
    /// Reserve inventory for an accepted deal. Called exactly once per
    /// conversation, guarded by the conversation state.
    fn reserve(&self, item: &str, qty: u32) {
        if let Some(mut units) = self.inventory.get_mut(item) {
            *units = units.saturating_sub(qty);
        }
    }

    async fn evaluate_offer(
        &self,
        ctx: &AgentContext,
        message: &Message,
        terms: &TradeTerms,
    ) -> Result<(), AgentError> {
        ctx.update_conversation(&message.correlation_id, |c| {
            c.item = Some(terms.item.clone());
            c.qty = Some(terms.qty);
            c.exchanges += 1;
        });

        let available = self.inventory.get(&terms.item).map(|n| *n).unwrap_or(0);
        if available < terms.qty {
            info!(
                seller = %ctx.id(),
                item = %terms.item,
                requested = terms.qty,
                available,
                "Declining: insufficient inventory"
            );
            ctx.set_conversation_state(&message.correlation_id, "declined");
            return ctx
                .send_message(reply_to(
                    ctx,
                    message,
                    MessageBody::Decline {
                        reason: format!(
                            "Insufficient inventory: {} {} requested, {} available",
                            terms.qty, terms.item, available
                        ),
                    },
                ))
                .await;
        }

        if terms.unit_price < self.policy.min_price {
            ctx.set_conversation_state(&message.correlation_id, "declined");
            return ctx
                .send_message(reply_to(
                    ctx,
                    message,
                    MessageBody::Decline {
                        reason: format!(
                            "Offered price {} is below our minimum of {}",
                            terms.unit_price, self.policy.min_price
                        ),
                    },
                ))
                .await;
        }

        if terms.unit_price >= self.policy.ideal_price {
            return self.accept(ctx, message, terms.clone()).await;
        }

        // Between min and ideal: counter at the midpoint.
        let midpoint = (terms.unit_price + self.policy.ideal_price) / 2.0;
        debug!(
            seller = %ctx.id(),
            offered = terms.unit_price,
            midpoint,
            "Countering"
        );
        ctx.update_conversation(&message.correlation_id, |c| {
            c.state = "counter_sent".to_string();
            c.last_offer_price = Some(midpoint);
            c.exchanges += 1;
        });
        ctx.send_message(reply_to(
            ctx,
            message,
            MessageBody::Counter(CounterTerms {
                terms: TradeTerms {
                    unit_price: midpoint,
                    ..terms.clone()
                },
                reason: format!(
                    "Can't do {} for {}, but {} works",
                    terms.unit_price, terms.item, midpoint
                ),
            }),
        ))
        .await
    }

    async fn accept(
        &self,
        ctx: &AgentContext,
        message: &Message,
        terms: TradeTerms,
    ) -> Result<(), AgentError> {
        self.reserve(&terms.item, terms.qty);
        let accept = AcceptTerms::new(terms);
        info!(
            seller = %ctx.id(),
            correlation_id = %message.correlation_id,
            unit_price = accept.terms.unit_price,
            total = accept.total_amount,
            "Accepting deal"
        );
        ctx.update_conversation(&message.correlation_id, |c| {
            c.state = "accepted".to_string();
            c.agreed_price = Some(accept.terms.unit_price);
            c.exchanges += 1;
        });
        ctx.send_message(reply_to(ctx, message, MessageBody::Accept(accept)))
            .await
    }
}

#[async_trait]
impl Behavior for SellerBehavior {
    async fn on_message(&mut self, ctx: &AgentContext, message: Message) -> Result<(), AgentError> {
        match &message.body {
            MessageBody::Offer(terms) => self.evaluate_offer(ctx, &message, terms).await,
            MessageBody::Counter(counter) => {
                self.evaluate_offer(ctx, &message, &counter.terms).await
            }
            MessageBody::Accept(accept) => {
                // The buyer accepted our counter. Reserve once — the state
                // guard keeps a replayed or doubled accept from
                // double-decrementing.
                let conversation = ctx.conversation(&message.correlation_id);
                if conversation.state == "accepted" {
                    warn!(
                        seller = %ctx.id(),
                        correlation_id = %message.correlation_id,
                        "Deal already accepted; ignoring"
                    );
                    return Ok(());
                }
                self.reserve(&accept.terms.item, accept.terms.qty);
                ctx.update_conversation(&message.correlation_id, |c| {
                    c.state = "accepted".to_string();
                    c.agreed_price = Some(accept.terms.unit_price);
                    c.exchanges += 1;
                });
                info!(
                    seller = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    total = accept.total_amount,
                    "Buyer accepted our counter"
                );
                Ok(())
            }
            MessageBody::Decline { reason } => {
                info!(
                    seller = %ctx.id(),
                    correlation_id = %message.correlation_id,
                    reason = %reason,
                    "Buyer declined"
                );
                ctx.set_conversation_state(&message.correlation_id, "declined");
                Ok(())
            }
            other => {
                debug!(seller = %ctx.id(), kind = other.kind(), "Ignoring message type");
                Ok(())
            }
        }
    }
}
