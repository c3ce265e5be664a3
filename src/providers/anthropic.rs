//! Anthropic-family adapter: a genuine top-level `system` parameter (not
//! folded into the first user message), header-based auth, and
//! `InputTokens`/`OutputTokens`/`StopReason` passthrough.

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

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    name: String,
    http: HttpProviderClient,
    model: String,
    model_mapping: HashMap<String, String>,
    healthy: AtomicBool,
    metrics: ProviderMetricsInner,
}

impl AnthropicProvider {
    pub fn new(config: crate::models::ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration {
                message: "anthropic provider requires an api key".to_string(),
            })?;

        let timeout = if config.timeout.as_secs() > 0 {
            config.timeout
        } else {
            std::time::Duration::from_secs(120)
        };

        let mut headers = config.headers.clone();
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());

        let http = HttpProviderClient::new(
            timeout,
            config.endpoint.clone(),
            DEFAULT_ENDPOINT,
            &headers,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: api_key,
            },
        )?;

        Ok(Self {
            name: config.name,
            http,
            model: config.model.unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
            model_mapping: config.model_mapping,
            healthy: AtomicBool::new(true),
            metrics: ProviderMetricsInner::default(),
        })
    }

    fn resolve_model(&self, request: &CompletionRequest) -> String {
        let requested = request.model.clone().unwrap_or_else(|| self.model.clone());
        self.model_mapping
            .get(&requested)
            .cloned()
            .unwrap_or(requested)
    }

    fn build_body(&self, model: &str, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": if request.max_tokens > 0 { request.max_tokens } else { DEFAULT_MAX_TOKENS },
            "temperature": request.effective_temperature(),
            "stream": stream,
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        if request.top_p > 0.0 {
            body["top_p"] = json!(request.top_p);
        }
        if request.top_k > 0 {
            body["top_k"] = json!(request.top_k);
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
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
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicStreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: ContentDelta },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ContentDelta {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

fn map_finish_reason(raw: Option<String>) -> FinishReason {
    match raw.as_deref() {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::MaxTokens,
        Some(other) => FinishReason::Other(other.to_string()),
        None => FinishReason::Other("unknown".to_string()),
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();
        let model = self.resolve_model(request);
        let body = self.build_body(&model, request, false);

        let result: Result<AnthropicResponse, ProviderError> =
            self.http.post_json(cancel, "/v1/messages", &body).await;

        match result {
            Ok(resp) => {
                self.healthy.store(true, Ordering::Relaxed);
                self.metrics.record(true, started);
                let content = resp
                    .content
                    .into_iter()
                    .map(|c| c.text)
                    .collect::<Vec<_>>()
                    .join("");
                Ok(CompletionResponse {
                    content,
                    model,
                    usage: UsageStats::new(resp.usage.input_tokens, resp.usage.output_tokens),
                    latency: started.elapsed(),
                    finish_reason: map_finish_reason(resp.stop_reason),
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
        let model = self.resolve_model(request);
        let body = self.build_body(&model, request, true);

        let response = self.http.post_json_raw_streaming(cancel, "/v1/messages", &body).await;
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
        let mut usage: Option<AnthropicUsage> = None;
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
                let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(payload) else {
                    continue;
                };
                match event {
                    AnthropicStreamEvent::ContentBlockDelta { delta } => {
                        if !delta.text.is_empty() {
                            content.push_str(&delta.text);
                            handler(crate::models::StreamChunk::content(delta.text))?;
                        }
                    }
                    AnthropicStreamEvent::MessageDelta { delta, usage: u } => {
                        finish_reason = delta.stop_reason;
                        if u.is_some() {
                            usage = u;
                        }
                    }
                    AnthropicStreamEvent::Other => {}
                }
            }
        }

        let _ = handler(crate::models::StreamChunk::done());
        self.healthy.store(true, Ordering::Relaxed);
        self.metrics.record(true, started);
        Ok(CompletionResponse {
            content,
            model,
            usage: usage
                .map(|u| UsageStats::new(u.input_tokens, u.output_tokens))
                .unwrap_or_default(),
            latency: started.elapsed(),
            finish_reason: map_finish_reason(finish_reason),
            metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
        })
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<HealthCheckResult, ProviderError> {
        let started = Instant::now();
        let probe = json!({
            "model": self.model,
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "ping"}],
        });
        let result: Result<serde_json::Value, ProviderError> =
            self.http.post_json(cancel, "/v1/messages", &probe).await;
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
            ProviderCapability::Vision,
            ProviderCapability::CodeGeneration,
            ProviderCapability::LongContext,
        ]
    }

    fn estimate_cost(&self, request: &CompletionRequest) -> Option<CostEstimate> {
        let (input, output) = estimate_tokens(request);
        let (input_rate, output_rate) = (0.003, 0.015);
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
    fn build_body_carries_system_prompt_as_top_level_field() {
        let config = crate::models::ProviderConfig::new("anthropic", ProviderType::Anthropic)
            .with_api_key("test-key");
        let provider = AnthropicProvider::new(config).unwrap();
        let req = CompletionRequest {
            system_prompt: Some("be terse".to_string()),
            prompt: "hi".to_string(),
            ..Default::default()
        };
        let body = provider.build_body("claude-3-5-sonnet-latest", &req, false);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn map_finish_reason_maps_end_turn_to_stop() {
        assert_eq!(map_finish_reason(Some("end_turn".to_string())), FinishReason::Stop);
        assert_eq!(map_finish_reason(Some("max_tokens".to_string())), FinishReason::MaxTokens);
    }
}
