//! # Gateway Data Model
//!
//! This module defines the core value types that flow through the gateway:
//! completion requests and responses, usage and cost accounting, health
//! results, streaming chunks, and the provider configuration record stored
//! by the registry.
//!
//! ## Overview
//!
//! - **CompletionRequest / CompletionResponse**: the uniform call shape every
//!   provider adapter translates to and from.
//! - **UsageStats / CostEstimate**: token accounting and the 4-char heuristic
//!   cost projection (see [`crate::common::estimate_tokens`]).
//! - **HealthCheckResult**: the result shape returned by `Provider::health`
//!   and cached by the registry.
//! - **StreamChunk**: the unit a streaming provider hands to its chunk
//!   handler; the terminal chunk always has `done = true`.
//! - **ProviderConfig / ProviderType**: the registry's unit of configuration.
//!
//! ```rust
//! use ultrafast_models_sdk::models::{CompletionRequest, ProviderType, ProviderConfig};
//!
//! let request = CompletionRequest {
//!     prompt: "Summarize the attached log.".to_string(),
//!     ..Default::default()
//! };
//!
//! let config = ProviderConfig::new("primary-openai", ProviderType::OpenAI)
//!     .with_api_key("sk-...")
//!     .with_weight(70);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The closed set of adapter families the registry knows how to construct,
/// plus an escape hatch for adapters registered at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    Bedrock,
    Ollama,
    Gemini,
    AzureOpenAI,
    Custom(String),
}

impl ProviderType {
    /// Canonical lowercase tag, used for logging and storage keys.
    pub fn as_str(&self) -> &str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Bedrock => "bedrock",
            ProviderType::Ollama => "ollama",
            ProviderType::Gemini => "gemini",
            ProviderType::AzureOpenAI => "azure-openai",
            ProviderType::Custom(tag) => tag.as_str(),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pluggable capability an adapter advertises. Used for capability-based
/// selection upstream of routing; the router itself never inspects these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderCapability {
    Chat,
    Completion,
    Streaming,
    Vision,
    CodeGeneration,
    LongContext,
}

/// Registry-level configuration for one named provider instance.
///
/// `name` is the registry key and must be unique. `weight` and `priority`
/// feed the routing strategies; `settings` is a free-form bag for
/// provider-specific knobs that don't deserve a dedicated field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub api_key_secret_arn: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub region: Option<String>,
    pub enabled: bool,
    pub priority: u32,
    /// Routing weight in `[0, 100]`.
    pub weight: u32,
    /// Requests per minute; `0` means unlimited.
    pub rate_limit: u32,
    /// `0` means "use the adapter's own default".
    #[serde(with = "crate::common::duration_serde", rename = "timeout_seconds")]
    pub timeout: Duration,
    pub settings: HashMap<String, String>,
    /// Alias table from a caller-supplied model name to the provider's own.
    pub model_mapping: HashMap<String, String>,
    /// Extra headers merged into every outbound request.
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            provider_type,
            api_key: None,
            api_key_secret_arn: None,
            endpoint: None,
            model: None,
            region: None,
            enabled: true,
            priority: 0,
            weight: 0,
            rate_limit: 0,
            timeout: Duration::from_secs(0),
            settings: HashMap::new(),
            model_mapping: HashMap::new(),
            headers: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_key_secret_arn(mut self, arn: impl Into<String>) -> Self {
        self.api_key_secret_arn = Some(arn.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.min(100);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_model_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.model_mapping.insert(from.into(), to.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A uniform completion request. Providers translate this into their own
/// wire shape; nothing here is provider-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// `0` means "use the provider's default".
    pub max_tokens: u32,
    /// Negative values are treated as "use the default 0.7"; `0.0` is a
    /// legitimate deterministic setting.
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub model: Option<String>,
    pub stop_sequences: Vec<String>,
    pub stream: bool,
    pub metadata: HashMap<String, String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            system_prompt: None,
            max_tokens: 0,
            temperature: -1.0,
            top_p: 0.0,
            top_k: 0,
            model: None,
            stop_sequences: Vec::new(),
            stream: false,
            metadata: HashMap::new(),
        }
    }
}

impl CompletionRequest {
    /// The temperature to actually send upstream, applying the
    /// negative-means-default rule.
    pub fn effective_temperature(&self) -> f32 {
        if self.temperature < 0.0 {
            0.7
        } else {
            self.temperature
        }
    }
}

/// Token accounting for a single completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl UsageStats {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Why a completion stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ContentFilter,
    Other(String),
}

/// The uniform response every adapter produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: UsageStats,
    pub latency: Duration,
    pub finish_reason: FinishReason,
    pub metadata: HashMap<String, String>,
}

/// Health status reported by an adapter or cached by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// The result of one health check call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub latency: Duration,
    pub message: String,
    pub last_checked: chrono::DateTime<chrono::Utc>,
    pub consecutive_failures: u32,
}

impl HealthCheckResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency,
            message: String::new(),
            last_checked: chrono::Utc::now(),
            consecutive_failures: 0,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency: Duration::from_secs(0),
            message: message.into(),
            last_checked: chrono::Utc::now(),
            consecutive_failures: 1,
        }
    }
}

/// One chunk of a streamed completion. The final chunk a handler sees for a
/// successful stream always has `chunk_type == Done` and empty content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub chunk_type: StreamChunkType,
    pub content: String,
    pub done: bool,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkType {
    Content,
    Done,
    Error,
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            chunk_type: StreamChunkType::Content,
            content: text.into(),
            done: false,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn done() -> Self {
        Self {
            chunk_type: StreamChunkType::Done,
            content: String::new(),
            done: true,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            chunk_type: StreamChunkType::Error,
            content: String::new(),
            done: true,
            error: Some(message.into()),
            metadata: HashMap::new(),
        }
    }
}

/// A cost projection derived from the §4.6 heuristic, not a billed amount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostEstimate {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
    pub total_estimate: f64,
    pub currency: &'static str,
}

/// Per-call provenance the router attaches alongside the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub provider_name: String,
    pub provider_type: ProviderType,
    pub model: String,
    pub response_time: Duration,
    pub tokens_used: u32,
    pub estimated_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_temperature_defaults_negative_to_default() {
        let req = CompletionRequest {
            temperature: -1.0,
            ..Default::default()
        };
        assert_eq!(req.effective_temperature(), 0.7);
    }

    #[test]
    fn effective_temperature_preserves_zero() {
        let req = CompletionRequest {
            temperature: 0.0,
            ..Default::default()
        };
        assert_eq!(req.effective_temperature(), 0.0);
    }

    #[test]
    fn provider_config_builder_clamps_weight() {
        let cfg = ProviderConfig::new("p", ProviderType::OpenAI).with_weight(250);
        assert_eq!(cfg.weight, 100);
    }

    #[test]
    fn usage_stats_total_is_sum() {
        let usage = UsageStats::new(10, 20);
        assert_eq!(usage.total_tokens, 30);
    }
}
