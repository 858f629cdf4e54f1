//! Per-agent conversation state.
//!
//! Each agent keeps its own view of every conversation it participates in,
//! keyed by correlation id. Views are never shared between agents and never
//! explicitly destroyed — process-lifetime growth is a documented property
//! of this design (only the dedup sets evict).

use chrono::{DateTime, Utc};

/// An agent's local view of one conversation thread.
#[derive(Debug, Clone)]
pub struct Conversation {
    /// The correlation id this view tracks.
    pub correlation_id: String,
    /// Free-form state label ("initiated", "offer_sent", "accepted", ...).
    pub state: String,
    /// Item under negotiation, once known.
    pub item: Option<String>,
    /// Quantity under negotiation, once known.
    pub qty: Option<u32>,
    /// The last price this agent put on the table.
    pub last_offer_price: Option<f64>,
    /// Final per-unit price, once a deal is struck.
    pub agreed_price: Option<f64>,
    /// Negotiation messages exchanged so far (sent and received).
    pub exchanges: u32,
    /// When this view was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh view in the `initiated` state.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            correlation_id: correlation_id.into(),
            state: "initiated".to_string(),
            item: None,
            qty: None,
            last_offer_price: None,
            agreed_price: None,
            exchanges: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
