//! Telegram agent — entry and exit point of the decision pipeline.
//!
//! User text arrives through [`TelegramAgent::handle_user_message`] (an API
//! call, not the transport), gets a fresh correlation id, and is forwarded
//! to the decision agent as an AI_DECISION_REQ. Replies and notifications
//! come back over the topic and accumulate in a pending-notification list
//! that the chat frontend polls. Nothing in that list expires on its own;
//! removal is an explicit clear by correlation id or a full clear.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use bazaar_types::message::{AgentId, Message, MessageBody, NoticeLevel, Verdict};
use bazaar_types::signing::MessageSigner;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::TransferTool;

use crate::runtime::{AgentContext, AgentError, AgentRuntime, Behavior};

/// Last-message context per chat. Only the most recent message is kept.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub user_id: String,
    pub last_message: String,
    pub correlation_id: String,
}

/// A notification waiting to be delivered to a chat.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    /// Conversation this notification belongs to.
    pub correlation_id: String,
    /// Chat it should be shown in, when the correlation is known.
    pub chat_id: Option<String>,
    /// The text to show.
    pub text: String,
    /// Severity.
    pub level: NoticeLevel,
    /// When it was queued.
    pub queued_at: DateTime<Utc>,
}

#[derive(Default)]
struct TelegramStore {
    chats: DashMap<String, ChatContext>,
    // correlation id → chat id, so inbound replies can be routed to a chat.
    correlations: DashMap<String, String>,
    notifications: Mutex<Vec<PendingNotification>>,
}

impl TelegramStore {
    fn push(&self, notification: PendingNotification) {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }

    fn chat_for(&self, correlation_id: &str) -> Option<String> {
        self.correlations.get(correlation_id).map(|c| c.clone())
    }
}

/// Bridges external chat traffic onto the agent topic.
pub struct TelegramAgent {
    runtime: AgentRuntime,
    decision_agent: AgentId,
    store: Arc<TelegramStore>,
}

impl TelegramAgent {
    /// Create a stopped telegram agent that forwards to `decision_agent`.
    pub fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
        decision_agent: AgentId,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            runtime: AgentRuntime::new(id, topic, transfer, signer, dedup_capacity),
            decision_agent,
            store: Arc::new(TelegramStore::default()),
        }
    }

    /// Start the dispatch loop.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.runtime
            .start(Box::new(TelegramBehavior {
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

    /// Accept one user message from the chat frontend and forward it into
    /// the pipeline. Returns the correlation id of the new conversation.
    pub async fn handle_user_message(
        &self,
        chat_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<String, AgentError> {
        let ctx = self.runtime.context();
        let message = Message::new(
            ctx.id().clone(),
            self.decision_agent.clone(),
            MessageBody::AiDecisionReq {
                user_request: text.to_string(),
                context: json!({ "chatId": chat_id, "userId": user_id }),
            },
        );
        let correlation_id = message.correlation_id.clone();

        self.store.chats.insert(
            chat_id.to_string(),
            ChatContext {
                user_id: user_id.to_string(),
                last_message: text.to_string(),
                correlation_id: correlation_id.clone(),
            },
        );
        self.store
            .correlations
            .insert(correlation_id.clone(), chat_id.to_string());

        ctx.update_conversation(&correlation_id, |c| {
            c.state = "decision_requested".to_string();
            c.exchanges += 1;
        });
        info!(
            agent = %ctx.id(),
            chat_id,
            correlation_id = %correlation_id,
            "Forwarding user request to decision agent"
        );
        ctx.send_message(message).await?;
        Ok(correlation_id)
    }

    /// The stored context for a chat, if any message has been seen from it.
    pub fn chat_context(&self, chat_id: &str) -> Option<ChatContext> {
        self.store.chats.get(chat_id).map(|c| c.clone())
    }

    /// Notifications queued for `chat_id`.
    pub fn notifications_for(&self, chat_id: &str) -> Vec<PendingNotification> {
        self.store
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|n| n.chat_id.as_deref() == Some(chat_id))
            .cloned()
            .collect()
    }

    /// All queued notifications.
    pub fn all_notifications(&self) -> Vec<PendingNotification> {
        self.store
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop every notification belonging to `correlation_id`.
    pub fn clear_notifications(&self, correlation_id: &str) {
        self.store
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|n| n.correlation_id != correlation_id);
    }

    /// Drop all queued notifications.
    pub fn clear_all_notifications(&self) {
        self.store
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

struct TelegramBehavior {
    store: Arc<TelegramStore>,
}

#[async_trait]
impl Behavior for TelegramBehavior {
    async fn on_message(&mut self, ctx: &AgentContext, message: Message) -> Result<(), AgentError> {
        match &message.body {
            MessageBody::AiDecisionResp(decision) => {
                let (level, label) = match decision.decision {
                    Verdict::Approve => (NoticeLevel::Success, "approved"),
                    Verdict::Reject => (NoticeLevel::Warning, "rejected"),
                };
                ctx.set_conversation_state(
                    &message.correlation_id,
                    if decision.decision == Verdict::Approve {
                        "approved"
                    } else {
                        "rejected"
                    },
                );
                self.store.push(PendingNotification {
                    chat_id: self.store.chat_for(&message.correlation_id),
                    correlation_id: message.correlation_id.clone(),
                    text: format!("Request {}: {}", label, decision.reasoning),
                    level,
                    queued_at: Utc::now(),
                });
                Ok(())
            }
            MessageBody::Notify(notice) => {
                self.store.push(PendingNotification {
                    chat_id: self.store.chat_for(&message.correlation_id),
                    correlation_id: message.correlation_id.clone(),
                    text: notice.message.clone(),
                    level: notice.level,
                    queued_at: Utc::now(),
                });
                Ok(())
            }
            other => {
                debug!(agent = %ctx.id(), kind = other.kind(), "Ignoring message type");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_types::message::{Decision, Notice};
    use bazaar_types::signing::NoopSigner;
    use bazaar_wire::codec::{decode_message, encode_message};
    use bazaar_wire::topic::MemoryTopic;
    use bazaar_wire::transfer::MockTransferTool;
    use std::time::Duration;

    fn agent(topic: &Arc<MemoryTopic>) -> TelegramAgent {
        TelegramAgent::new(
            AgentId::from("telegram-1"),
            Arc::clone(topic) as Arc<dyn Topic>,
            Arc::new(MockTransferTool::new()),
            Arc::new(NoopSigner),
            AgentId::from("decision-1"),
            100,
        )
    }

    #[tokio::test]
    async fn test_user_message_forwards_decision_request() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        let mut sub = topic.subscribe().await.unwrap();
        agent.start().await.unwrap();

        let corr = agent
            .handle_user_message("chat-7", "user-3", "bridge 100 USDC from ethereum to polygon")
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_millis(200), sub.recv())
            .await
            .unwrap()
            .unwrap();
        let msg = decode_message(&delivery.payload).unwrap();
        assert_eq!(msg.correlation_id, corr);
        match &msg.body {
            MessageBody::AiDecisionReq {
                user_request,
                context,
            } => {
                assert!(user_request.contains("bridge 100 USDC"));
                assert_eq!(context["chatId"], "chat-7");
            }
            other => panic!("Expected AiDecisionReq, got {}", other.kind()),
        }
        let chat = agent.chat_context("chat-7").unwrap();
        assert_eq!(chat.correlation_id, corr);
        assert_eq!(chat.user_id, "user-3");
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_last_message_only_per_chat() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        agent.start().await.unwrap();

        agent
            .handle_user_message("chat-7", "user-3", "first")
            .await
            .unwrap();
        let corr2 = agent
            .handle_user_message("chat-7", "user-3", "second")
            .await
            .unwrap();

        let chat = agent.chat_context("chat-7").unwrap();
        assert_eq!(chat.last_message, "second");
        assert_eq!(chat.correlation_id, corr2);
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_decision_response_queues_notification() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        agent.start().await.unwrap();

        let corr = agent
            .handle_user_message("chat-7", "user-3", "swap something")
            .await
            .unwrap();
        let resp = Message::new_in(
            corr.clone(),
            AgentId::from("decision-1"),
            AgentId::from("telegram-1"),
            MessageBody::AiDecisionResp(Decision {
                decision: Verdict::Reject,
                should_execute_bridge: false,
                reasoning: "no supported token mentioned".to_string(),
                bridge_params: None,
            }),
        );
        topic.publish(encode_message(&resp).unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let pending = agent.notifications_for("chat-7");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].level, NoticeLevel::Warning);
        assert!(pending[0].text.contains("no supported token"));

        agent.clear_notifications(&corr);
        assert!(agent.notifications_for("chat-7").is_empty());
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_notify_queued_and_full_clear() {
        let topic = Arc::new(MemoryTopic::new("t"));
        let agent = agent(&topic);
        agent.start().await.unwrap();

        let notify = Message::new(
            AgentId::from("decision-1"),
            AgentId::from("telegram-1"),
            MessageBody::Notify(Notice::new("bridge completed", NoticeLevel::Success)),
        );
        topic
            .publish(encode_message(&notify).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let all = agent.all_notifications();
        assert_eq!(all.len(), 1);
        // No chat is known for this correlation; callers see it via the
        // unfiltered list only.
        assert!(all[0].chat_id.is_none());
        agent.clear_all_notifications();
        assert!(agent.all_notifications().is_empty());
        agent.stop().await;
    }
}
