//! Core types for the Bazaar agent mesh.
//!
//! Defines the message envelope shared by every agent on the consensus
//! topic, the closed payload union, canonical serialization for signing,
//! the pluggable signing strategies, and the bounded dedup set that gives
//! agents idempotent replay protection over an at-least-once transport.

pub mod canonical;
pub mod config;
pub mod dedup;
pub mod error;
pub mod message;
pub mod signing;

pub use canonical::{canonical_json, canonical_message_bytes};
pub use config::SystemConfig;
pub use dedup::BoundedSet;
pub use error::{BazaarError, BazaarResult};
pub use message::{AgentId, Message, MessageBody, Recipient};
pub use signing::{verify_signature, Ed25519Signer, MessageSigner, NoopSigner};
