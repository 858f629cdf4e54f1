//! Agent runtime base: lifecycle, dispatch loop, dedup, outbound send.
//!
//! An agent is logically single-threaded: one spawned task consumes topic
//! deliveries in order and runs each message's handler to completion before
//! accepting the next, so conversation state needs no locking inside a
//! handler. Inbound processing per delivery:
//!
//! 1. decode — malformed bytes are logged and dropped, never retried
//! 2. envelope validation — empty id/from/correlation id is dropped;
//!    payload semantics are the behavior's concern
//! 3. address filter — not addressed here and not broadcast: silent drop
//! 4. dedup by message id — replays are dropped silently
//! 5. dispatch to the role's [`Behavior`]; handler errors are caught and
//!    logged, one bad message never halts the loop
//!
//! Agents never block waiting for a correlated reply: every multi-step
//! protocol is a set of independent handlers correlated by id.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use bazaar_types::message::{AgentId, Message, MessageBody};
use bazaar_types::signing::MessageSigner;
use bazaar_types::BoundedSet;
use bazaar_wire::codec::encode_message;
use bazaar_wire::topic::Topic;
use bazaar_wire::transfer::{TokenKind, TransferReceipt, TransferTool};

use crate::conversation::Conversation;

/// Errors from the agent layer.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent must be running for this operation.
    #[error("Agent '{0}' is not running")]
    NotRunning(String),

    /// The transport rejected an operation.
    #[error("Transport error: {0}")]
    Transport(#[from] bazaar_wire::topic::TransportError),

    /// Encoding the outbound envelope failed.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The transfer tool rejected or failed a transfer.
    #[error("Transfer error: {0}")]
    Transfer(#[from] bazaar_wire::transfer::TransferError),

    /// A core type-layer error (validation, signing).
    #[error(transparent)]
    Types(#[from] bazaar_types::BazaarError),

    /// A behavior-level failure while handling a message.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration was rejected at construction time.
    #[error("Agent configuration error: {0}")]
    Config(String),
}

/// Lifecycle states of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Stopped => "stopped",
            AgentState::Starting => "starting",
            AgentState::Running => "running",
            AgentState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

/// Observability events emitted by the runtime, consumed by the
/// orchestrator. Decoupled from the send/receive path: a slow or absent
/// observer never affects dispatch.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The agent entered the running state.
    Started { agent: AgentId },
    /// The agent stopped.
    Stopped { agent: AgentId },
    /// An outbound message was published.
    MessageSent {
        agent: AgentId,
        message_id: String,
        kind: &'static str,
        to: String,
    },
    /// An outbound send failed.
    MessageError { agent: AgentId, error: String },
    /// An inbound message passed all filters and was dispatched.
    MessageReceived {
        agent: AgentId,
        message_id: String,
        kind: &'static str,
        from: AgentId,
    },
    /// A behavior returned an error; the message is dropped, not retried.
    HandlerFailed {
        agent: AgentId,
        message_id: String,
        error: String,
    },
}

/// Role-specific message handling, plugged into [`AgentRuntime`].
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Handle one inbound message addressed to this agent (or broadcast).
    ///
    /// Runs to completion before the next delivery is dispatched. Errors
    /// are logged by the runtime and do not stop the loop.
    async fn on_message(&mut self, ctx: &AgentContext, message: Message) -> Result<(), AgentError>;
}

struct ContextInner {
    id: AgentId,
    topic: Arc<dyn Topic>,
    transfer: Arc<dyn TransferTool>,
    signer: Arc<dyn MessageSigner>,
    state: Mutex<AgentState>,
    conversations: DashMap<String, Conversation>,
    events: broadcast::Sender<AgentEvent>,
}

/// Shared handle to an agent's core state, cloned into the dispatch task
/// and into behaviors. Conversation views are owned by this agent alone.
#[derive(Clone)]
pub struct AgentContext {
    inner: Arc<ContextInner>,
}

impl AgentContext {
    fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ContextInner {
                id,
                topic,
                transfer,
                signer,
                state: Mutex::new(AgentState::Stopped),
                conversations: DashMap::new(),
                events,
            }),
        }
    }

    /// This agent's id.
    pub fn id(&self) -> &AgentId {
        &self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: AgentState) {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Subscribe to this agent's observability events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        // No receivers is fine — observability is optional.
        let _ = self.inner.events.send(event);
    }

    /// Publish a message on the topic. Requires the running state.
    ///
    /// The configured signing strategy is applied to unsigned messages.
    /// Emits `MessageSent` or `MessageError` regardless of outcome; there is
    /// no automatic retry — at most one send attempt per call.
    pub async fn send_message(&self, mut message: Message) -> Result<(), AgentError> {
        if self.state() != AgentState::Running {
            let err = AgentError::NotRunning(self.inner.id.to_string());
            self.emit(AgentEvent::MessageError {
                agent: self.inner.id.clone(),
                error: err.to_string(),
            });
            return Err(err);
        }

        if message.signature.is_none() {
            if let Some(signature) = self.inner.signer.sign(&message)? {
                message.signature = Some(signature);
            }
        }

        let bytes = encode_message(&message)?;
        match self.inner.topic.publish(bytes).await {
            Ok(()) => {
                debug!(
                    agent = %self.inner.id,
                    message_id = %message.id,
                    kind = message.body.kind(),
                    to = %message.to,
                    "Message sent"
                );
                self.emit(AgentEvent::MessageSent {
                    agent: self.inner.id.clone(),
                    message_id: message.id,
                    kind: message.body.kind(),
                    to: message.to.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(agent = %self.inner.id, error = %e, "Message send failed");
                self.emit(AgentEvent::MessageError {
                    agent: self.inner.id.clone(),
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Execute a value transfer via the pluggable transfer tool.
    ///
    /// `token_id` uses the native-currency sentinel or an external token id.
    pub async fn execute_transfer(
        &self,
        to_account: &str,
        amount: f64,
        token_id: &str,
        memo: &str,
    ) -> Result<TransferReceipt, AgentError> {
        let kind = TokenKind::from_id(token_id);
        let receipt = self
            .inner
            .transfer
            .transfer(to_account, amount, &kind, memo)
            .await?;
        debug!(
            agent = %self.inner.id,
            to_account,
            amount,
            token = kind.id(),
            transaction_id = %receipt.transaction_id,
            "Transfer executed"
        );
        Ok(receipt)
    }

    /// This agent's view of a conversation, created as `initiated` if absent.
    pub fn conversation(&self, correlation_id: &str) -> Conversation {
        self.inner
            .conversations
            .entry(correlation_id.to_string())
            .or_insert_with(|| Conversation::new(correlation_id))
            .clone()
    }

    /// Mutate this agent's view of a conversation (created if absent).
    /// Last-writer-wins per field; the dispatch loop is single-threaded so
    /// handlers never race each other.
    pub fn update_conversation(&self, correlation_id: &str, f: impl FnOnce(&mut Conversation)) {
        let mut entry = self
            .inner
            .conversations
            .entry(correlation_id.to_string())
            .or_insert_with(|| Conversation::new(correlation_id));
        f(entry.value_mut());
        entry.updated_at = chrono::Utc::now();
    }

    /// Convenience: set only the state label.
    pub fn set_conversation_state(&self, correlation_id: &str, state: &str) {
        self.update_conversation(correlation_id, |c| c.state = state.to_string());
    }

    /// Number of conversation views held by this agent.
    pub fn conversation_count(&self) -> usize {
        self.inner.conversations.len()
    }
}

/// The runtime driving one agent: lifecycle plus the dispatch task.
pub struct AgentRuntime {
    ctx: AgentContext,
    dedup_capacity: usize,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AgentRuntime {
    /// Create a stopped runtime.
    pub fn new(
        id: AgentId,
        topic: Arc<dyn Topic>,
        transfer: Arc<dyn TransferTool>,
        signer: Arc<dyn MessageSigner>,
        dedup_capacity: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx: AgentContext::new(id, topic, transfer, signer),
            dedup_capacity,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// The shared context handle.
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Start the dispatch loop with the given behavior.
    ///
    /// No-op with a warning if already running. Fails closed: when
    /// subscription setup errors, the state stays `Stopped`.
    pub async fn start(&self, behavior: Box<dyn Behavior>) -> Result<(), AgentError> {
        match self.ctx.state() {
            AgentState::Stopped => {}
            other => {
                warn!(agent = %self.ctx.id(), state = %other, "start() ignored");
                return Ok(());
            }
        }
        self.ctx.set_state(AgentState::Starting);

        let subscription = match self.ctx.inner.topic.subscribe().await {
            Ok(sub) => sub,
            Err(e) => {
                self.ctx.set_state(AgentState::Stopped);
                warn!(agent = %self.ctx.id(), error = %e, "Subscription setup failed");
                return Err(e.into());
            }
        };

        let _ = self.shutdown.send(false);
        let shutdown_rx = self.shutdown.subscribe();
        let ctx = self.ctx.clone();
        let dedup = BoundedSet::new(self.dedup_capacity);

        let handle = tokio::spawn(dispatch_loop(ctx, subscription, behavior, dedup, shutdown_rx));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        self.ctx.set_state(AgentState::Running);
        info!(agent = %self.ctx.id(), "Agent started");
        self.ctx.emit(AgentEvent::Started {
            agent: self.ctx.id().clone(),
        });
        Ok(())
    }

    /// Stop the dispatch loop. Idempotent.
    pub async fn stop(&self) {
        if self.ctx.state() != AgentState::Running {
            return;
        }
        self.ctx.set_state(AgentState::Stopping);
        let _ = self.shutdown.send(true);

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.ctx.set_state(AgentState::Stopped);
        info!(agent = %self.ctx.id(), "Agent stopped");
        self.ctx.emit(AgentEvent::Stopped {
            agent: self.ctx.id().clone(),
        });
    }
}

async fn dispatch_loop(
    ctx: AgentContext,
    mut subscription: bazaar_wire::topic::Subscription,
    mut behavior: Box<dyn Behavior>,
    mut dedup: BoundedSet,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            delivery = subscription.recv() => {
                let Some(delivery) = delivery else {
                    debug!(agent = %ctx.id(), "Topic closed, ending dispatch loop");
                    break;
                };
                dispatch_one(&ctx, &mut *behavior, &mut dedup, &delivery.payload).await;
            }
        }
    }
}

/// Run one delivery through decode → validate → filter → dedup → handle.
async fn dispatch_one(
    ctx: &AgentContext,
    behavior: &mut dyn Behavior,
    dedup: &mut BoundedSet,
    payload: &[u8],
) {
    // Malformed bytes are permanently unprocessable — log and drop.
    let message = match bazaar_wire::codec::decode_message(payload) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(agent = %ctx.id(), error = %e, "Dropping undecodable message");
            return;
        }
    };

    // Envelope checks only: bad payload values (zero price, empty account)
    // still reach the behavior, which answers with a reasoned decline or
    // failed ack instead of a silent drop.
    if let Err(e) = message.validate_envelope() {
        warn!(
            agent = %ctx.id(),
            message_id = %message.id,
            error = %e,
            "Dropping message with malformed envelope"
        );
        return;
    }

    // Not addressed here: expected noise on a broadcast topic, not an error.
    if !message.to.addressed_to(ctx.id()) {
        return;
    }

    // Replay protection: at-least-once delivery duplicates are dropped.
    if !dedup.insert(message.id.clone()) {
        debug!(agent = %ctx.id(), message_id = %message.id, "Duplicate message dropped");
        return;
    }

    debug!(
        agent = %ctx.id(),
        message_id = %message.id,
        kind = message.body.kind(),
        from = %message.from,
        "Dispatching message"
    );
    ctx.emit(AgentEvent::MessageReceived {
        agent: ctx.id().clone(),
        message_id: message.id.clone(),
        kind: message.body.kind(),
        from: message.from.clone(),
    });

    let message_id = message.id.clone();
    if let Err(e) = behavior.on_message(ctx, message).await {
        // The message counts as processed; its effect is lost, not retried.
        warn!(
            agent = %ctx.id(),
            message_id = %message_id,
            error = %e,
            "Handler failed; message dropped"
        );
        ctx.emit(AgentEvent::HandlerFailed {
            agent: ctx.id().clone(),
            message_id,
            error: e.to_string(),
        });
    }
}

/// Re-exported for behaviors constructing replies.
pub use bazaar_types::message::Recipient;

/// Helper: make a reply inside the same conversation.
pub fn reply_to(ctx: &AgentContext, original: &Message, body: MessageBody) -> Message {
    Message::new_in(
        original.correlation_id.clone(),
        ctx.id().clone(),
        original.from.clone(),
        body,
    )
}
