//! Azure OpenAI adapter: same chat-completions wire shape as §4.2's
//! OpenAI-family adapter, but addressed at a deployment-scoped URL
//! (`/openai/deployments/{deployment}/chat/completions`) and authenticated
//! with an `api-key` header instead of a bearer token.

use crate::common::{calculate_cost, estimate_tokens};
use crate::error::ProviderError;
use crate::models::{
    CompletionRequest, CompletionResponse, CostEstimate, FinishReason, HealthCheckResult,
    ProviderCapability, ProviderType, UsageStats,
};
use crate::providers::http_client::{AuthStrategy, HttpProviderClient};
use crate::providers::{ChunkHandler, Provider, ProviderMetricsInner};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_API_VERSION: &str = "2024-06-01";

pub struct AzureOpenAIProvider {
    name: String,
    http: HttpProviderClient,
    deployment: String,
    api_version: String,
    model_mapping: HashMap<String, String>,
    healthy: AtomicBool,
    metrics: ProviderMetricsInner,
}

impl AzureOpenAIProvider {
    pub fn new(config: crate::models::ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration {
                message: "azure-openai provider requires an api key".to_string(),
            })?;
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| ProviderError::Configuration {
                message: "azure-openai provider requires an endpoint".to_string(),
            })?;
        let deployment = config.model.clone().ok_or_else(|| ProviderError::Configuration {
            message: "azure-openai provider requires a deployment name in `model`".to_string(),
        })?;

        let timeout = if config.timeout.as_secs() > 0 {
            config.timeout
        } else {
            std::time::Duration::from_secs(120)
        };

        let api_version = config
            .settings
            .get("api_version")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let http = HttpProviderClient::new(
            timeout,
            Some(endpoint),
            "",
            &config.headers,
            AuthStrategy::Header {
                name: "api-key".to_string(),
                value: api_key,
            },
        )?;

        Ok(Self {
            name: config.name,
            http,
            deployment,
            api_version,
            model_mapping: config.model_mapping,
            healthy: AtomicBool::new(true),
            metrics: ProviderMetricsInner::default(),
        })
    }

    fn resolve_deployment(&self, request: &CompletionRequest) -> String {
        let requested = request
            .model
            .clone()
            .unwrap_or_else(|| self.deployment.clone());
        self.model_mapping
            .get(&requested)
            .cloned()
            .unwrap_or(requested)
    }

    fn completions_path(&self, deployment: &str) -> String {
        format!(
            "/openai/deployments/{deployment}/chat/completions?api-version={}",
            self.api_version
        )
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "messages": messages,
            "max_tokens": if request.max_tokens > 0 { request.max_tokens } else { DEFAULT_MAX_TOKENS },
            "temperature": request.effective_temperature(),
            "stream": stream,
        });
        if request.top_p > 0.0 {
            body["top_p"] = json!(request.top_p);
        }
        if !request.stop_sequences.is_empty() {
            body["stop"] = json!(request.stop_sequences);
        }
        body
    }

    fn mark(&self, err: &ProviderError) {
        if err.marks_unhealthy() {
            self.healthy.store(false, Ordering::Relaxed);
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<AzureUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct AzureUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunkBody {
    choices: Vec<StreamChunkChoice>,
    #[serde(default)]
    usage: Option<AzureUsage>,
}

#[derive(Deserialize)]
struct StreamChunkChoice {
    delta: StreamChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

fn map_finish_reason(raw: Option<String>) -> FinishReason {
    match raw.as_deref() {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::MaxTokens,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(other) => FinishReason::Other(other.to_string()),
        None => FinishReason::Other("unknown".to_string()),
    }
}

/// A completion the model itself flagged as content-filtered is surfaced as
/// a classified error rather than a normal response (§7).
fn content_filter_err(model: &str) -> ProviderError {
    ProviderError::classified(
        crate::error::ErrorCode::ContentFilter,
        format!("response from model {model} was blocked by content filtering"),
    )
}

#[async_trait::async_trait]
impl Provider for AzureOpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureOpenAI
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();
        let deployment = self.resolve_deployment(request);
        let body = self.build_body(request, false);
        let path = self.completions_path(&deployment);

        let result: Result<ChatCompletion, ProviderError> = self.http.post_json(cancel, &path, &body).await;

        match result {
            Ok(resp) => {
                self.healthy.store(true, Ordering::Relaxed);
                self.metrics.record(true, started);
                let choice = resp.choices.into_iter().next().ok_or_else(|| {
                    ProviderError::classified(
                        crate::error::ErrorCode::InvalidRequest,
                        "azure openai response had no choices",
                    )
                })?;
                let usage = resp
                    .usage
                    .map(|u| UsageStats::new(u.prompt_tokens, u.completion_tokens))
                    .unwrap_or_default();
                let finish_reason = map_finish_reason(choice.finish_reason);
                if finish_reason == FinishReason::ContentFilter {
                    return Err(content_filter_err(&deployment));
                }
                Ok(CompletionResponse {
                    content: choice.message.content,
                    model: deployment,
                    usage,
                    latency: started.elapsed(),
                    finish_reason,
                    metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
                })
            }
            Err(err) => {
                self.mark(&err);
                self.metrics.record(false, started);
                Err(err)
            }
        }
    }

    async fn complete_stream(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
        mut handler: ChunkHandler,
    ) -> Result<CompletionResponse, ProviderError> {
        use futures::StreamExt;

        let started = Instant::now();
        let deployment = self.resolve_deployment(request);
        let body = self.build_body(request, true);
        let path = self.completions_path(&deployment);

        let response = self.http.post_json_raw_streaming(cancel, &path, &body).await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let err = crate::providers::http_client::map_error_response(r).await;
                self.mark(&err);
                self.metrics.record(false, started);
                return Err(err);
            }
            Err(err) => {
                self.mark(&err);
                self.metrics.record(false, started);
                return Err(err);
            }
        };

        let mut content = String::new();
        let mut finish_reason = None;
        let mut usage = None;
        let mut buffer = String::new();
        let mut bytes_stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.metrics.record(false, started);
                    return Err(ProviderError::Cancelled);
                }
                chunk = bytes_stream.next() => chunk,
            };
            let Some(chunk_result) = next else { break };
            let chunk = chunk_result?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if payload == "[DONE]" {
                    let _ = handler(crate::models::StreamChunk::done());
                    self.healthy.store(true, Ordering::Relaxed);
                    self.metrics.record(true, started);
                    let finish_reason = map_finish_reason(finish_reason);
                    if finish_reason == FinishReason::ContentFilter {
                        return Err(content_filter_err(&deployment));
                    }
                    return Ok(CompletionResponse {
                        content,
                        model: deployment,
                        usage: usage.unwrap_or_default(),
                        latency: started.elapsed(),
                        finish_reason,
                        metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
                    });
                }
                let Ok(parsed) = serde_json::from_str::<StreamChunkBody>(payload) else {
                    continue;
                };
                if let Some(choice) = parsed.choices.into_iter().next() {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            content.push_str(&text);
                            handler(crate::models::StreamChunk::content(text))?;
                        }
                    }
                    if choice.finish_reason.is_some() {
                        finish_reason = choice.finish_reason;
                    }
                }
                if parsed.usage.is_some() {
                    usage = parsed
                        .usage
                        .map(|u| UsageStats::new(u.prompt_tokens, u.completion_tokens));
                }
            }
        }

        let _ = handler(crate::models::StreamChunk::done());
        self.healthy.store(true, Ordering::Relaxed);
        self.metrics.record(true, started);
        let finish_reason = map_finish_reason(finish_reason);
        if finish_reason == FinishReason::ContentFilter {
            return Err(content_filter_err(&deployment));
        }
        Ok(CompletionResponse {
            content,
            model: deployment,
            usage: usage.unwrap_or_default(),
            latency: started.elapsed(),
            finish_reason,
            metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
        })
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<HealthCheckResult, ProviderError> {
        let started = Instant::now();
        let path = format!("/openai/models?api-version={}", self.api_version);
        let result = self.http.get_json::<serde_json::Value>(cancel, &path).await;
        match result {
            Ok(_) => {
                self.healthy.store(true, Ordering::Relaxed);
                Ok(HealthCheckResult::healthy(started.elapsed()))
            }
            Err(err) => {
                self.healthy.store(false, Ordering::Relaxed);
                Ok(HealthCheckResult::unhealthy(err.to_string()))
            }
        }
    }

    fn capabilities(&self) -> Vec<ProviderCapability> {
        vec![
            ProviderCapability::Chat,
            ProviderCapability::Completion,
            ProviderCapability::Streaming,
            ProviderCapability::CodeGeneration,
        ]
    }

    fn estimate_cost(&self, request: &CompletionRequest) -> Option<CostEstimate> {
        let (input, output) = estimate_tokens(request);
        let (input_rate, output_rate) = (0.005, 0.015);
        Some(CostEstimate {
            input_cost_per_1k: input_rate,
            output_cost_per_1k: output_rate,
            estimated_input_tokens: input,
            estimated_output_tokens: output,
            total_estimate: calculate_cost(input, output, input_rate, output_rate),
            currency: "USD",
        })
    }

    fn metrics(&self) -> crate::providers::ProviderMetrics {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_deployment_endpoint_and_key() {
        let config = crate::models::ProviderConfig::new("azure", ProviderType::AzureOpenAI);
        assert!(AzureOpenAIProvider::new(config).is_err());
    }

    #[test]
    fn completions_path_carries_deployment_and_api_version() {
        let config = crate::models::ProviderConfig::new("azure", ProviderType::AzureOpenAI)
            .with_api_key("key")
            .with_endpoint("https://my-resource.openai.azure.com")
            .with_model("gpt4-deployment");
        let provider = AzureOpenAIProvider::new(config).unwrap();
        let path = provider.completions_path("gpt4-deployment");
        assert!(path.starts_with("/openai/deployments/gpt4-deployment/chat/completions?api-version="));
    }
}
