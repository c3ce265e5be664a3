//! # Routing Configuration
//!
//! Loads the three environment variables that seed a [`crate::strategy::Strategy`]
//! (§6): `LLM_ROUTING_STRATEGY`, `PROVIDER_WEIGHTS`, and `DEFAULT_LLM_PROVIDER`.
//! Mirrors the override-from-environment pattern used by this codebase's own
//! gateway-level config loader, scaled down to the three knobs the routing
//! layer needs.

use crate::strategy::{parse_strategy_kind, parse_weights, RoutingStrategyKind};
use std::collections::HashMap;
use std::env;

const ENV_STRATEGY: &str = "LLM_ROUTING_STRATEGY";
const ENV_WEIGHTS: &str = "PROVIDER_WEIGHTS";
const ENV_DEFAULT_PROVIDER: &str = "DEFAULT_LLM_PROVIDER";

/// The resolved routing configuration, ready to build a [`crate::strategy::Strategy`]
/// from.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub strategy_kind: RoutingStrategyKind,
    pub weights: HashMap<String, f64>,
    pub default_provider: Option<String>,
}

impl RoutingConfig {
    /// Loads from the process environment, falling back to weighted random
    /// with no weights and no default provider when variables are absent.
    /// Invalid `PROVIDER_WEIGHTS` values are logged and ignored rather than
    /// failing the load (an empty weights table still works for weighted
    /// random, defaulting every provider to weight 1.0).
    pub fn from_env() -> Self {
        let strategy_kind = env::var(ENV_STRATEGY)
            .map(|raw| parse_strategy_kind(&raw))
            .unwrap_or(RoutingStrategyKind::WeightedRandom);

        let weights = match env::var(ENV_WEIGHTS) {
            Ok(raw) => match parse_weights(&raw) {
                Ok(weights) => weights,
                Err(err) => {
                    tracing::warn!(error = %err, "invalid PROVIDER_WEIGHTS, ignoring");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        let default_provider = env::var(ENV_DEFAULT_PROVIDER).ok();

        Self {
            strategy_kind,
            weights,
            default_provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that
    // touch them so they don't trample each other under parallel test runs.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var(ENV_STRATEGY);
        env::remove_var(ENV_WEIGHTS);
        env::remove_var(ENV_DEFAULT_PROVIDER);
        let config = RoutingConfig::from_env();
        assert_eq!(config.strategy_kind, RoutingStrategyKind::WeightedRandom);
        assert!(config.weights.is_empty());
        assert!(config.default_provider.is_none());
    }

    #[test]
    fn reads_all_three_variables() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(ENV_STRATEGY, "failover");
        env::set_var(ENV_WEIGHTS, "openai:50,anthropic:50");
        env::set_var(ENV_DEFAULT_PROVIDER, "openai");
        let config = RoutingConfig::from_env();
        assert_eq!(config.strategy_kind, RoutingStrategyKind::Failover);
        assert_eq!(config.default_provider.as_deref(), Some("openai"));
        assert!((config.weights["openai"] - 0.5).abs() < 1e-9);
        env::remove_var(ENV_STRATEGY);
        env::remove_var(ENV_WEIGHTS);
        env::remove_var(ENV_DEFAULT_PROVIDER);
    }
}
