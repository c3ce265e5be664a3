//! OpenAI-family adapter: chat-completions wire shape, SSE streaming with a
//! `[DONE]` sentinel, bearer authentication.

use crate::common::{calculate_cost, estimate_tokens};
use crate::error::ProviderError;
use crate::models::{
    CompletionRequest, CompletionResponse, CostEstimate, FinishReason, HealthCheckResult,
    ProviderCapability, ProviderType, UsageStats,
};
use crate::providers::http_client::{AuthStrategy, HttpProviderClient};
use crate::providers::{ChunkHandler, Provider, ProviderMetricsInner};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct OpenAIProvider {
    name: String,
    http: HttpProviderClient,
    model: String,
    model_mapping: HashMap<String, String>,
    healthy: AtomicBool,
    metrics: ProviderMetricsInner,
}

impl OpenAIProvider {
    pub fn new(config: crate::models::ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration {
                message: "openai provider requires an api key".to_string(),
            })?;

        let timeout = if config.timeout.as_secs() > 0 {
            config.timeout
        } else {
            std::time::Duration::from_secs(120)
        };

        let http = HttpProviderClient::new(
            timeout,
            config.endpoint.clone(),
            DEFAULT_ENDPOINT,
            &config.headers,
            AuthStrategy::Bearer { token: api_key },
        )?;

        Ok(Self {
            name: config.name,
            http,
            model: config.model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
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
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": model,
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
    usage: Option<OpenAIUsage>,
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
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
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
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();
        let model = self.resolve_model(request);
        let body = self.build_body(&model, request, false);

        let result: Result<ChatCompletion, ProviderError> = self
            .http
            .post_json(cancel, "/v1/chat/completions", &body)
            .await;

        match result {
            Ok(resp) => {
                self.healthy.store(true, Ordering::Relaxed);
                self.metrics.record(true, started);
                let choice = resp.choices.into_iter().next().ok_or_else(|| {
                    ProviderError::classified(
                        crate::error::ErrorCode::InvalidRequest,
                        "openai response had no choices",
                    )
                })?;
                let usage = resp
                    .usage
                    .map(|u| UsageStats::new(u.prompt_tokens, u.completion_tokens))
                    .unwrap_or_default();
                let finish_reason = map_finish_reason(choice.finish_reason);
                if finish_reason == FinishReason::ContentFilter {
                    return Err(content_filter_err(&model));
                }
                Ok(CompletionResponse {
                    content: choice.message.content,
                    model,
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
        let model = self.resolve_model(request);
        let body = self.build_body(&model, request, true);

        let response = self.http.post_json_raw_streaming(cancel, "/v1/chat/completions", &body).await;
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
                        return Err(content_filter_err(&model));
                    }
                    return Ok(CompletionResponse {
                        content,
                        model,
                        usage: usage.unwrap_or_default(),
                        latency: started.elapsed(),
                        finish_reason,
                        metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
                    });
                }
                let Ok(parsed) = serde_json::from_str::<ChatChunk>(payload) else {
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
            return Err(content_filter_err(&model));
        }
        Ok(CompletionResponse {
            content,
            model,
            usage: usage.unwrap_or_default(),
            latency: started.elapsed(),
            finish_reason,
            metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
        })
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<HealthCheckResult, ProviderError> {
        let started = Instant::now();
        let result = self
            .http
            .get_json::<serde_json::Value>(cancel, "/v1/models")
            .await;
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
    fn resolve_model_applies_mapping() {
        let mut config = crate::models::ProviderConfig::new("oai", ProviderType::OpenAI)
            .with_api_key("sk-test");
        config.model_mapping.insert("fast".to_string(), "gpt-4o-mini".to_string());
        let provider = OpenAIProvider::new(config).unwrap();
        let req = CompletionRequest {
            model: Some("fast".to_string()),
            ..Default::default()
        };
        assert_eq!(provider.resolve_model(&req), "gpt-4o-mini");
    }

    #[test]
    fn build_body_omits_stop_when_empty() {
        let config = crate::models::ProviderConfig::new("oai", ProviderType::OpenAI)
            .with_api_key("sk-test");
        let provider = OpenAIProvider::new(config).unwrap();
        let req = CompletionRequest::default();
        let body = provider.build_body("gpt-4o-mini", &req, false);
        assert!(body.get("stop").is_none());
    }
}
