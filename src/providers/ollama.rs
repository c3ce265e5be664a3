//! Ollama adapter (self-hosted): no authentication, a 300s default timeout
//! (local inference runs slow), and an NDJSON streaming transport instead of
//! SSE — the body is a concatenation of complete JSON objects, not
//! `data: `-prefixed lines.

use crate::common::estimate_tokens;
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

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

pub struct OllamaProvider {
    name: String,
    http: HttpProviderClient,
    model: String,
    model_mapping: HashMap<String, String>,
    healthy: AtomicBool,
    metrics: ProviderMetricsInner,
}

impl OllamaProvider {
    pub fn new(config: crate::models::ProviderConfig) -> Result<Self, ProviderError> {
        let timeout = if config.timeout.as_secs() > 0 {
            config.timeout
        } else {
            std::time::Duration::from_secs(300)
        };

        let http = HttpProviderClient::new(
            timeout,
            config.endpoint.clone(),
            DEFAULT_ENDPOINT,
            &config.headers,
            AuthStrategy::None,
        )?;

        Ok(Self {
            name: config.name,
            http,
            model: config.model.unwrap_or_else(|| "llama3".to_string()),
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

    fn combined_prompt(request: &CompletionRequest) -> String {
        match &request.system_prompt {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        }
    }

    fn build_body(&self, model: &str, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut options = json!({
            "temperature": request.effective_temperature(),
        });
        if request.max_tokens > 0 {
            options["num_predict"] = json!(request.max_tokens);
        }
        if request.top_p > 0.0 {
            options["top_p"] = json!(request.top_p);
        }
        if request.top_k > 0 {
            options["top_k"] = json!(request.top_k);
        }
        if !request.stop_sequences.is_empty() {
            options["stop"] = json!(request.stop_sequences);
        }

        json!({
            "model": model,
            "prompt": Self::combined_prompt(request),
            "stream": stream,
            "options": options,
        })
    }

    fn mark(&self, err: &ProviderError) {
        if err.marks_unhealthy() {
            self.healthy.store(false, Ordering::Relaxed);
        }
    }
}

#[derive(Deserialize, Default)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

fn finish_reason_for(done: bool) -> FinishReason {
    if done {
        FinishReason::Stop
    } else {
        FinishReason::MaxTokens
    }
}

#[async_trait::async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();
        let model = self.resolve_model(request);
        let body = self.build_body(&model, request, false);

        let result: Result<OllamaGenerateResponse, ProviderError> =
            self.http.post_json(cancel, "/api/generate", &body).await;

        match result {
            Ok(resp) => {
                self.healthy.store(true, Ordering::Relaxed);
                self.metrics.record(true, started);
                Ok(CompletionResponse {
                    content: resp.response,
                    model,
                    usage: UsageStats::new(resp.prompt_eval_count, resp.eval_count),
                    latency: started.elapsed(),
                    finish_reason: finish_reason_for(resp.done),
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

        let response = self.http.post_json_raw_streaming(cancel, "/api/generate", &body).await;
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
        let mut prompt_eval_count = 0u32;
        let mut eval_count = 0u32;
        let mut done = false;
        let mut buffer = String::new();
        let mut bytes_stream = response.bytes_stream();

        // Ollama concatenates whole JSON objects rather than framing them
        // with `data: `; decode one value at a time as the buffer grows.
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

            loop {
                let mut deserializer = serde_json::Deserializer::from_str(buffer.trim_start());
                match OllamaGenerateResponse::deserialize(&mut deserializer) {
                    Ok(parsed) => {
                        let consumed = buffer.len() - buffer.trim_start().len() + deserializer.byte_offset();
                        buffer.drain(..consumed);

                        if !parsed.response.is_empty() {
                            content.push_str(&parsed.response);
                            handler(crate::models::StreamChunk::content(parsed.response))?;
                        }
                        if parsed.done {
                            done = true;
                            prompt_eval_count = parsed.prompt_eval_count;
                            eval_count = parsed.eval_count;
                        }
                    }
                    Err(_) => break,
                }
            }
        }

        let _ = handler(crate::models::StreamChunk::done());
        self.healthy.store(true, Ordering::Relaxed);
        self.metrics.record(true, started);
        Ok(CompletionResponse {
            content,
            model,
            usage: UsageStats::new(prompt_eval_count, eval_count),
            latency: started.elapsed(),
            finish_reason: finish_reason_for(done),
            metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
        })
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<HealthCheckResult, ProviderError> {
        let started = Instant::now();
        let result = self
            .http
            .get_json::<serde_json::Value>(cancel, "/api/tags")
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
        Some(CostEstimate {
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            estimated_input_tokens: input,
            estimated_output_tokens: output,
            total_estimate: 0.0,
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
    fn combined_prompt_joins_with_blank_line() {
        let req = CompletionRequest {
            prompt: "hello".to_string(),
            system_prompt: Some("be terse".to_string()),
            ..Default::default()
        };
        assert_eq!(OllamaProvider::combined_prompt(&req), "be terse\n\nhello");
    }

    #[test]
    fn combined_prompt_without_system_is_prompt_only() {
        let req = CompletionRequest {
            prompt: "hello".to_string(),
            ..Default::default()
        };
        assert_eq!(OllamaProvider::combined_prompt(&req), "hello");
    }

    #[test]
    fn estimate_cost_is_zero_rate_self_hosted() {
        let config = crate::models::ProviderConfig::new("local", ProviderType::Ollama);
        let provider = OllamaProvider::new(config).unwrap();
        let estimate = provider.estimate_cost(&CompletionRequest::default()).unwrap();
        assert_eq!(estimate.input_cost_per_1k, 0.0);
        assert_eq!(estimate.total_estimate, 0.0);
    }

    #[test]
    fn finish_reason_done_is_stop() {
        assert_eq!(finish_reason_for(true), FinishReason::Stop);
        assert_eq!(finish_reason_for(false), FinishReason::MaxTokens);
    }
}
