//! # Routing Strategy
//!
//! Given the registry's list of currently-healthy provider names and a
//! weights table, a [`Strategy`] picks one name per call (§4.10). None of
//! the three kinds touch the registry or providers directly — they're pure
//! selection over `&[String]`, which keeps them trivially unit-testable.

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategyKind {
    WeightedRandom,
    RoundRobin,
    Failover,
}

impl FromStr for RoutingStrategyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted" => Ok(RoutingStrategyKind::WeightedRandom),
            "round_robin" => Ok(RoutingStrategyKind::RoundRobin),
            "failover" => Ok(RoutingStrategyKind::Failover),
            _ => Err(()),
        }
    }
}

/// Parses a `LLM_ROUTING_STRATEGY` value, falling back to `weighted` and
/// logging a warning for anything unrecognized.
pub fn parse_strategy_kind(raw: &str) -> RoutingStrategyKind {
    match RoutingStrategyKind::from_str(raw) {
        Ok(kind) => kind,
        Err(()) => {
            tracing::warn!(value = raw, "unknown routing strategy, falling back to weighted");
            RoutingStrategyKind::WeightedRandom
        }
    }
}

/// Parses a `"name:w[,name:w]*"` weights string, normalizing to sum 1.0.
/// Negative weights are rejected; malformed entries are skipped with a
/// warning.
pub fn parse_weights(raw: &str) -> Result<HashMap<String, f64>, String> {
    let mut parsed: Vec<(String, f64)> = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((name, weight_str)) = entry.split_once(':') else {
            tracing::warn!(entry, "malformed weight entry, skipping");
            continue;
        };
        let weight: f64 = weight_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid weight value in entry '{entry}'"))?;
        if weight < 0.0 {
            return Err(format!("negative weight in entry '{entry}'"));
        }
        parsed.push((name.trim().to_string(), weight));
    }
    let total: f64 = parsed.iter().map(|(_, w)| w).sum();
    let normalized = if total > 0.0 {
        parsed
            .into_iter()
            .map(|(name, w)| (name, w / total))
            .collect()
    } else {
        parsed.into_iter().map(|(name, _)| (name, 0.0)).collect()
    };
    Ok(normalized)
}

/// Selects among healthy provider names per §4.10. Round-robin state is the
/// only mutable piece and lives in an atomic counter; weighted random draws
/// from the thread-local RNG, which already satisfies the "serialized RNG"
/// requirement without an explicit lock.
pub struct Strategy {
    kind: RoutingStrategyKind,
    weights: HashMap<String, f64>,
    default_provider: Option<String>,
    round_robin_counter: AtomicUsize,
}

impl Strategy {
    pub fn new(
        kind: RoutingStrategyKind,
        weights: HashMap<String, f64>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            kind,
            weights,
            default_provider,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> RoutingStrategyKind {
        self.kind
    }

    pub fn weights(&self) -> &HashMap<String, f64> {
        &self.weights
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Picks one name from `healthy`, or `None` if it's empty.
    pub fn select(&self, healthy: &[String]) -> Option<String> {
        if healthy.is_empty() {
            return None;
        }
        match self.kind {
            RoutingStrategyKind::WeightedRandom => self.select_weighted_random(healthy),
            RoutingStrategyKind::RoundRobin => self.select_round_robin(healthy),
            RoutingStrategyKind::Failover => self.select_failover(healthy),
        }
    }

    fn weight_of(&self, name: &str) -> f64 {
        self.weights.get(name).copied().unwrap_or(1.0)
    }

    fn select_weighted_random(&self, healthy: &[String]) -> Option<String> {
        let total: f64 = healthy.iter().map(|p| self.weight_of(p)).sum();
        if total <= 0.0 {
            let idx = rand::thread_rng().gen_range(0..healthy.len());
            return Some(healthy[idx].clone());
        }
        let r: f64 = rand::thread_rng().gen_range(0.0..total);
        let mut cumulative = 0.0;
        for name in healthy {
            cumulative += self.weight_of(name);
            if r < cumulative {
                return Some(name.clone());
            }
        }
        healthy.last().cloned()
    }

    fn select_round_robin(&self, healthy: &[String]) -> Option<String> {
        let idx = self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(healthy[idx].clone())
    }

    fn select_failover(&self, healthy: &[String]) -> Option<String> {
        if let Some(default) = &self.default_provider {
            if healthy.iter().any(|p| p == default) {
                return Some(default.clone());
            }
        }
        let mut best: Option<(&String, f64)> = None;
        for name in healthy {
            let w = self.weight_of(name);
            match &best {
                Some((_, best_w)) if w <= *best_w => {}
                _ => best = Some((name, w)),
            }
        }
        best.map(|(name, _)| name.clone()).or_else(|| healthy.first().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_weights_normalizes_to_one() {
        let weights = parse_weights("openai:50,anthropic:30,ollama:20").unwrap();
        assert!((weights["openai"] - 0.5).abs() < 1e-9);
        assert!((weights["anthropic"] - 0.3).abs() < 1e-9);
        assert!((weights["ollama"] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn parse_weights_rejects_negative() {
        assert!(parse_weights("a:-1").is_err());
    }

    #[test]
    fn parse_strategy_kind_falls_back_on_unknown() {
        assert_eq!(parse_strategy_kind("bogus"), RoutingStrategyKind::WeightedRandom);
        assert_eq!(parse_strategy_kind("round_robin"), RoutingStrategyKind::RoundRobin);
    }

    #[test]
    fn round_robin_is_fair_over_n_calls() {
        let strategy = Strategy::new(RoutingStrategyKind::RoundRobin, HashMap::new(), None);
        let healthy = names(&["a", "b", "c"]);
        let mut counts = HashMap::new();
        for _ in 0..300 {
            let chosen = strategy.select(&healthy).unwrap();
            *counts.entry(chosen).or_insert(0) += 1;
        }
        for name in &healthy {
            assert_eq!(counts[name], 100);
        }
    }

    #[test]
    fn weighted_random_empty_returns_none() {
        let strategy = Strategy::new(RoutingStrategyKind::WeightedRandom, HashMap::new(), None);
        assert_eq!(strategy.select(&[]), None);
    }

    #[test]
    fn weighted_random_respects_distribution() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 0.7);
        weights.insert("b".to_string(), 0.3);
        let strategy = Strategy::new(RoutingStrategyKind::WeightedRandom, weights, None);
        let healthy = names(&["a", "b"]);
        let mut a_count = 0;
        let n = 20_000;
        for _ in 0..n {
            if strategy.select(&healthy).unwrap() == "a" {
                a_count += 1;
            }
        }
        let ratio = a_count as f64 / n as f64;
        assert!((ratio - 0.7).abs() < 0.02, "ratio was {ratio}");
    }

    #[test]
    fn failover_prefers_default_when_healthy() {
        let strategy = Strategy::new(
            RoutingStrategyKind::Failover,
            HashMap::new(),
            Some("bedrock".to_string()),
        );
        let healthy = names(&["anthropic", "openai"]);
        // default "bedrock" is not healthy, falls back to highest weight
        assert!(strategy.select(&healthy).is_some());
    }

    #[test]
    fn failover_falls_back_to_highest_weight_then_first() {
        let mut weights = HashMap::new();
        weights.insert("anthropic".to_string(), 0.7);
        weights.insert("openai".to_string(), 0.3);
        let strategy = Strategy::new(
            RoutingStrategyKind::Failover,
            weights,
            Some("bedrock".to_string()),
        );
        let healthy = names(&["anthropic", "openai"]);
        assert_eq!(strategy.select(&healthy).as_deref(), Some("anthropic"));
    }

    #[test]
    fn failover_returns_default_when_present() {
        let strategy = Strategy::new(
            RoutingStrategyKind::Failover,
            HashMap::new(),
            Some("anthropic".to_string()),
        );
        let healthy = names(&["anthropic", "openai"]);
        assert_eq!(strategy.select(&healthy).as_deref(), Some("anthropic"));
    }
}
