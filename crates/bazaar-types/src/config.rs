//! Configuration types for the agent system.
//!
//! Everything tunable at deployment time lives here: topic name, dedup
//! capacities, pricing policies, decision-rule word lists. The kernel loads
//! these from TOML; every section has defaults so a missing file still
//! yields a runnable system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dedup::DEFAULT_DEDUP_CAPACITY;

/// Token-id sentinel denoting the network's native currency.
pub const NATIVE_TOKEN: &str = "native";

/// Top-level system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Consensus topic all agents subscribe to.
    pub topic: String,
    /// Capacity of each agent's message-id dedup set.
    pub dedup_capacity: usize,
    /// Buyer pricing policy.
    pub buyer: BuyerPolicy,
    /// Seller pricing policy and starting inventory.
    pub seller: SellerPolicy,
    /// Payment settlement settings.
    pub payment: PaymentConfig,
    /// Decision-agent rule lists.
    pub decision: DecisionRules,
    /// Bridge-executor settings.
    pub bridge: BridgeConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            topic: "bazaar.agents".to_string(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            buyer: BuyerPolicy::default(),
            seller: SellerPolicy::default(),
            payment: PaymentConfig::default(),
            decision: DecisionRules::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// Buyer-side negotiation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyerPolicy {
    /// Hard budget per unit.
    pub max_price: f64,
    /// Accept a counter up to `max_price × auto_accept_threshold`
    /// (> 1.0 tolerates slight overrun).
    pub auto_accept_threshold: f64,
    /// Account credited when a deal settles.
    pub payment_account: String,
}

impl Default for BuyerPolicy {
    fn default() -> Self {
        Self {
            max_price: 100.0,
            auto_accept_threshold: 1.1,
            payment_account: "0.0.2001".to_string(),
        }
    }
}

/// Seller-side pricing policy and inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SellerPolicy {
    /// Offers below this are declined outright.
    pub min_price: f64,
    /// Offers at or above this are accepted immediately.
    pub ideal_price: f64,
    /// Units available per item. Decremented only at accept time.
    pub inventory: HashMap<String, u32>,
}

impl Default for SellerPolicy {
    fn default() -> Self {
        Self {
            min_price: 50.0,
            ideal_price: 80.0,
            inventory: HashMap::from([("widgets".to_string(), 100)]),
        }
    }
}

/// Payment agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Default token for settlement (`native` = network currency).
    pub token_id: String,
    /// Capacity of the processed-payment idempotency set.
    pub processed_capacity: usize,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            token_id: NATIVE_TOKEN.to_string(),
            processed_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// Rule lists for the decision agent's intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionRules {
    /// At least one must appear (case-insensitive) for a request to proceed.
    pub keywords: Vec<String>,
    /// Chains accepted as `from <chain>` / `to <chain>`.
    pub supported_chains: Vec<String>,
    /// Tokens accepted by case-insensitive substring match.
    pub supported_tokens: Vec<String>,
}

impl Default for DecisionRules {
    fn default() -> Self {
        Self {
            keywords: ["bridge", "transfer", "send", "cross-chain", "move", "swap"]
                .map(String::from)
                .to_vec(),
            supported_chains: ["ethereum", "polygon", "arbitrum", "optimism", "base"]
                .map(String::from)
                .to_vec(),
            supported_tokens: ["USDC", "USDT", "ETH", "MATIC"].map(String::from).to_vec(),
        }
    }
}

/// Bridge-executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Delay used by the simulated execution path, in milliseconds.
    pub simulate_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            simulate_delay_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let config = SystemConfig::default();
        assert!(!config.topic.is_empty());
        assert!(config.buyer.auto_accept_threshold > 1.0);
        assert!(config.seller.min_price < config.seller.ideal_price);
        assert!(config.decision.keywords.contains(&"bridge".to_string()));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SystemConfig = toml::from_str(
            r#"
            topic = "custom.topic"

            [buyer]
            max_price = 90.0
            "#,
        )
        .unwrap();
        assert_eq!(config.topic, "custom.topic");
        assert_eq!(config.buyer.max_price, 90.0);
        assert_eq!(config.buyer.auto_accept_threshold, 1.1);
        assert_eq!(config.payment.token_id, NATIVE_TOKEN);
    }
}
