//! Message envelope and payload union for the Bazaar agent mesh.
//!
//! Every message on the consensus topic is a JSON envelope carrying an id
//! (used for dedup), sender/recipient, a correlation id grouping one logical
//! conversation, and a type-tagged payload. The payload union is closed:
//! adding a message type forces every agent's match to be revisited at
//! compile time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::BazaarError;

/// Broadcast sentinel used as the `to` field on the wire.
pub const BROADCAST: &str = "*";

/// Identifier of an agent on the shared topic. Opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a message is directed: one agent, or every subscriber.
///
/// Serialized as a plain string — the broadcast sentinel `"*"` or the
/// recipient's agent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// A specific agent.
    Agent(AgentId),
    /// Every subscriber on the topic.
    Broadcast,
}

impl Recipient {
    /// Whether `agent` should process a message addressed here.
    pub fn addressed_to(&self, agent: &AgentId) -> bool {
        match self {
            Recipient::Broadcast => true,
            Recipient::Agent(id) => id == agent,
        }
    }
}

impl From<AgentId> for Recipient {
    fn from(id: AgentId) -> Self {
        Recipient::Agent(id)
    }
}

impl From<&str> for Recipient {
    fn from(s: &str) -> Self {
        if s == BROADCAST {
            Recipient::Broadcast
        } else {
            Recipient::Agent(AgentId::from(s))
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::Broadcast => write!(f, "{BROADCAST}"),
            Recipient::Agent(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Recipient::Broadcast => serializer.serialize_str(BROADCAST),
            Recipient::Agent(id) => serializer.serialize_str(&id.0),
        }
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Recipient::from(s.as_str()))
    }
}

/// Terms of a trade carried by offers, counters, and accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeTerms {
    /// What is being bought/sold.
    pub item: String,
    /// How many units.
    pub qty: u32,
    /// Price per unit.
    pub unit_price: f64,
    /// Settlement currency / token symbol.
    pub currency: String,
}

impl TradeTerms {
    /// Total value of the trade at these terms.
    pub fn total(&self) -> f64 {
        f64::from(self.qty) * self.unit_price
    }
}

/// A counter-offer: revised terms plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterTerms {
    /// The revised terms.
    #[serde(flatten)]
    pub terms: TradeTerms,
    /// Why the counterparty should take this price.
    pub reason: String,
}

/// Acceptance of a deal at final terms.
///
/// `total_amount` is computed once at construction; callers must not
/// recompute it divergently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptTerms {
    /// The accepted terms.
    #[serde(flatten)]
    pub terms: TradeTerms,
    /// `qty × unit_price`, fixed at acceptance time.
    pub total_amount: f64,
}

impl AcceptTerms {
    /// Accept `terms`, fixing the total amount once.
    pub fn new(terms: TradeTerms) -> Self {
        let total_amount = terms.total();
        Self {
            terms,
            total_amount,
        }
    }
}

/// Request for an idempotent value transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Amount to transfer.
    pub amount: f64,
    /// Token identifier, or the native-currency sentinel.
    pub token_id: String,
    /// Account to credit.
    pub to_account: String,
    /// Human-readable memo describing the purchase.
    pub memo: String,
    /// The purchased item.
    pub item: String,
    /// How many units were purchased.
    pub qty: u32,
}

/// Success/failure tag shared by payment and bridge outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    /// The operation completed.
    Success,
    /// The operation failed.
    Failed,
}

/// Acknowledgement of a payment request — exactly one per accepted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// Transaction id from the transfer tool ("" on failure).
    pub transaction_id: String,
    /// Whether the transfer went through.
    pub status: ExecStatus,
    /// Amount transferred (or attempted).
    pub amount: f64,
    /// Token the transfer was denominated in.
    pub token_id: String,
    /// When the settlement attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Failure description, present only when `status` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// APPROVE/REJECT verdict of the decision agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// The request is well-formed and should proceed.
    Approve,
    /// The request failed a check.
    Reject,
}

/// Parameters of a cross-chain bridge operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    /// Chain the funds leave.
    pub source_chain: String,
    /// Chain the funds arrive on.
    pub target_chain: String,
    /// Token symbol being bridged.
    pub token: String,
    /// Amount to bridge.
    pub amount: f64,
    /// Optional destination address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// Result of the decision agent's rule pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// The verdict.
    pub decision: Verdict,
    /// Whether a bridge execution was dispatched.
    pub should_execute_bridge: bool,
    /// Human-readable explanation, naming the first failing check on reject.
    pub reasoning: String,
    /// Extracted bridge parameters, present only on approve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_params: Option<BridgeRequest>,
}

/// Outcome of a (human-confirmed) bridge execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeOutcome {
    /// Whether the execution succeeded.
    pub status: ExecStatus,
    /// When the execution finished.
    pub timestamp: DateTime<Utc>,
    /// On-chain transaction hash, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    /// Failure description, present only when `status` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Severity of a notification forwarded to the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Success,
    Error,
}

/// A human-readable notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    /// The notification text.
    pub message: String,
    /// Severity.
    pub level: NoticeLevel,
    /// When the notification was produced.
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    /// Create a notice timestamped now.
    pub fn new(message: impl Into<String>, level: NoticeLevel) -> Self {
        Self {
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }
}

/// The closed payload union. Wire tag is `type`, content is `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    /// Opening offer in a negotiation.
    Offer(TradeTerms),
    /// Counter-offer with revised terms.
    Counter(CounterTerms),
    /// Acceptance at final terms.
    Accept(AcceptTerms),
    /// Rejection of the negotiation.
    Decline {
        /// Why the deal was declined.
        reason: String,
    },
    /// Request for an idempotent transfer.
    PaymentReq(PaymentRequest),
    /// Settlement acknowledgement.
    PaymentAck(PaymentReceipt),
    /// External user text entering the decision pipeline.
    TelegramMsg {
        /// Originating chat.
        chat_id: String,
        /// Originating user.
        user_id: String,
        /// The raw text.
        text: String,
    },
    /// Ask the decision agent to classify a user request.
    AiDecisionReq {
        /// The raw user request text.
        user_request: String,
        /// Free-form caller context.
        #[serde(default)]
        context: serde_json::Value,
    },
    /// The decision agent's verdict.
    AiDecisionResp(Decision),
    /// Instruct the bridge executor to record a pending execution.
    BridgeExecReq(BridgeRequest),
    /// Final outcome of a bridge execution.
    BridgeExecResp(BridgeOutcome),
    /// Informational notification for the end user.
    Notify(Notice),
    /// Protocol-level error report.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl MessageBody {
    /// The wire tag of this payload, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Offer(_) => "OFFER",
            MessageBody::Counter(_) => "COUNTER",
            MessageBody::Accept(_) => "ACCEPT",
            MessageBody::Decline { .. } => "DECLINE",
            MessageBody::PaymentReq(_) => "PAYMENT_REQ",
            MessageBody::PaymentAck(_) => "PAYMENT_ACK",
            MessageBody::TelegramMsg { .. } => "TELEGRAM_MSG",
            MessageBody::AiDecisionReq { .. } => "AI_DECISION_REQ",
            MessageBody::AiDecisionResp(_) => "AI_DECISION_RESP",
            MessageBody::BridgeExecReq(_) => "BRIDGE_EXEC_REQ",
            MessageBody::BridgeExecResp(_) => "BRIDGE_EXEC_RESP",
            MessageBody::Notify(_) => "NOTIFY",
            MessageBody::Error { .. } => "ERROR",
        }
    }
}

/// A message envelope. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id, generated at creation; basis for dedup.
    pub id: String,
    /// The sending agent.
    pub from: AgentId,
    /// The recipient (agent id or broadcast sentinel).
    pub to: Recipient,
    /// Groups all messages of one logical conversation. Equals `id` for the
    /// first message of a thread.
    pub correlation_id: String,
    /// Sender-side creation time. Not authoritative for ordering.
    pub timestamp: DateTime<Utc>,
    /// Optional detached signature over the canonical envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// The typed payload.
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    /// Create a message that starts a new conversation: the correlation id
    /// is the fresh message id.
    pub fn new(from: AgentId, to: impl Into<Recipient>, body: MessageBody) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            correlation_id: id.clone(),
            id,
            from,
            to: to.into(),
            timestamp: Utc::now(),
            signature: None,
            body,
        }
    }

    /// Create a message inside an existing conversation.
    pub fn new_in(
        correlation_id: impl Into<String>,
        from: AgentId,
        to: impl Into<Recipient>,
        body: MessageBody,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from,
            to: to.into(),
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            signature: None,
            body,
        }
    }

    /// Attach a signature.
    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Envelope-level errors: non-empty id, sender, and correlation id.
    ///
    /// Field presence and a recognized `type` are already enforced at
    /// decode time by the payload union; a missing signature is valid.
    pub fn envelope_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.id.is_empty() {
            errors.push("id must not be empty".to_string());
        }
        if self.from.0.is_empty() {
            errors.push("from must not be empty".to_string());
        }
        if self.correlation_id.is_empty() {
            errors.push("correlationId must not be empty".to_string());
        }
        errors
    }

    /// `Ok(())` when the envelope fields are well-formed. This is the check
    /// the dispatch loop applies to inbound messages; payload semantics stay
    /// with [`Message::validate`].
    pub fn validate_envelope(&self) -> Result<(), BazaarError> {
        let errors = self.envelope_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BazaarError::InvalidMessage(errors.join("; ")))
        }
    }

    /// Semantic validation errors, empty when the message is well-formed.
    ///
    /// Advisory: agents respond to bad payload values with a reasoned
    /// DECLINE or failed ACK rather than a silent drop, so this is not
    /// enforced on either the send or the dispatch path.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = self.envelope_errors();
        match &self.body {
            MessageBody::Offer(terms) | MessageBody::Counter(CounterTerms { terms, .. }) => {
                check_terms(terms, &mut errors);
            }
            MessageBody::Accept(accept) => {
                check_terms(&accept.terms, &mut errors);
                if accept.total_amount <= 0.0 {
                    errors.push("totalAmount must be positive".to_string());
                }
            }
            MessageBody::Decline { reason } => {
                if reason.is_empty() {
                    errors.push("decline reason must not be empty".to_string());
                }
            }
            MessageBody::PaymentReq(req) => {
                if req.amount <= 0.0 {
                    errors.push("payment amount must be positive".to_string());
                }
                if req.to_account.is_empty() {
                    errors.push("toAccount must not be empty".to_string());
                }
                if req.token_id.is_empty() {
                    errors.push("tokenId must not be empty".to_string());
                }
            }
            MessageBody::BridgeExecReq(req) => {
                if req.amount <= 0.0 {
                    errors.push("bridge amount must be positive".to_string());
                }
                if req.source_chain.is_empty() || req.target_chain.is_empty() {
                    errors.push("sourceChain and targetChain must not be empty".to_string());
                }
            }
            _ => {}
        }
        errors
    }

    /// `Ok(())` when the message passes semantic validation.
    pub fn validate(&self) -> Result<(), BazaarError> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BazaarError::InvalidMessage(errors.join("; ")))
        }
    }
}

fn check_terms(terms: &TradeTerms, errors: &mut Vec<String>) {
    if terms.item.is_empty() {
        errors.push("item must not be empty".to_string());
    }
    if terms.qty == 0 {
        errors.push("qty must be positive".to_string());
    }
    if terms.unit_price <= 0.0 {
        errors.push("unitPrice must be positive".to_string());
    }
}
