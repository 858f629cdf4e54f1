//! Autonomous agents for the Bazaar mesh.
//!
//! Every agent shares the same runtime base: a lifecycle state machine, a
//! single-threaded dispatch loop over the consensus topic with dedup and
//! address filtering, a per-agent conversation store, and an observability
//! event channel. Roles differ only in their [`Behavior`] implementation:
//!
//! - [`BuyerAgent`] / [`SellerAgent`] — offer/counter/accept/decline
//!   negotiation with pricing policies.
//! - [`PaymentAgent`] — idempotent settlement of accepted deals.
//! - [`TelegramAgent`] → [`DecisionAgent`] → [`BridgeAgent`] — the
//!   deterministic decision pipeline from user text to a human-confirmed
//!   bridge execution.

pub mod bridge;
pub mod buyer;
pub mod conversation;
pub mod decision;
pub mod payment;
pub mod runtime;
pub mod seller;
pub mod telegram;

pub use bridge::{BridgeAgent, ExecutionStatus, PendingExecution};
pub use buyer::BuyerAgent;
pub use conversation::Conversation;
pub use decision::DecisionAgent;
pub use payment::PaymentAgent;
pub use runtime::{AgentContext, AgentError, AgentEvent, AgentRuntime, AgentState, Behavior};
pub use seller::SellerAgent;
pub use telegram::{PendingNotification, TelegramAgent};
