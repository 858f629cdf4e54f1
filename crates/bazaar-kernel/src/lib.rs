//! Bazaar kernel: wires the agent mesh together.
//!
//! The kernel owns nothing domain-specific. It loads configuration, sets up
//! telemetry, constructs the six agents over one shared topic, and exposes
//! an aggregate status/event surface for embedding applications.

pub mod config;
pub mod orchestrator;
pub mod telemetry;

pub use config::load_config;
pub use orchestrator::{AgentStatus, AgentSystem, SystemStatus};
pub use telemetry::init_tracing;
