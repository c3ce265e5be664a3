//! Gemini adapter: `key=` query-parameter auth, a three-field request body
//! (`contents`/`generationConfig`/`systemInstruction`), and an SSE streaming
//! transport where each event payload is itself a complete response object.

use crate::common::{calculate_cost, estimate_tokens};
use crate::error::{ErrorCode, ProviderError};
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

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct GeminiProvider {
    name: String,
    http: HttpProviderClient,
    model: String,
    model_mapping: HashMap<String, String>,
    healthy: AtomicBool,
    metrics: ProviderMetricsInner,
}

impl GeminiProvider {
    pub fn new(config: crate::models::ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration {
                message: "gemini provider requires an api key".to_string(),
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
            AuthStrategy::QueryParam {
                name: "key".to_string(),
                value: api_key,
            },
        )?;

        Ok(Self {
            name: config.name,
            http,
            model: config.model.unwrap_or_else(|| "gemini-1.5-pro".to_string()),
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

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut generation_config = json!({
            "maxOutputTokens": if request.max_tokens > 0 { request.max_tokens } else { DEFAULT_MAX_TOKENS },
            "temperature": request.effective_temperature(),
        });
        if request.top_p > 0.0 {
            generation_config["topP"] = json!(request.top_p);
        }
        if request.top_k > 0 {
            generation_config["topK"] = json!(request.top_k);
        }
        if !request.stop_sequences.is_empty() {
            generation_config["stopSequences"] = json!(request.stop_sequences);
        }

        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": request.prompt}],
            }],
            "generationConfig": generation_config,
        });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        body
    }

    fn mark(&self, err: &ProviderError) {
        if err.marks_unhealthy() {
            self.healthy.store(false, Ordering::Relaxed);
        }
    }

    fn generate_path(&self, model: &str, stream: bool) -> String {
        if stream {
            format!("/{API_VERSION}/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("/{API_VERSION}/models/{model}:generateContent")
        }
    }
}

#[derive(Deserialize, Default)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize, Default)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Default)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

/// Maps Gemini's finish-reason vocabulary onto the uniform taxonomy per
/// §4.4: `STOP`→stop, `MAX_TOKENS`→max_tokens, `SAFETY`/`RECITATION`→
/// content_filter, `OTHER`→other, anything else passes through verbatim.
fn map_finish_reason(raw: Option<String>) -> FinishReason {
    match raw.as_deref() {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::MaxTokens,
        Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
        Some("OTHER") => FinishReason::Other("other".to_string()),
        Some(other) => FinishReason::Other(other.to_string()),
        None => FinishReason::Other("unknown".to_string()),
    }
}

/// A candidate blocked by Gemini's safety or recitation filters is surfaced
/// as a classified error rather than a normal response (§7).
fn content_filter_err(model: &str) -> ProviderError {
    ProviderError::classified(
        ErrorCode::ContentFilter,
        format!("response from model {model} was blocked by content filtering"),
    )
}

/// `isRateLimit`/`isAuth`/`isQuotaExceeded` predicates per §4.4, applied
/// while classifying a failed API response.
fn classify_error(status: u16, api_status: Option<&str>, message: String) -> ProviderError {
    let is_rate_limit = status == 429 || api_status == Some("RESOURCE_EXHAUSTED");
    let is_auth = status == 401
        || status == 403
        || matches!(api_status, Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED"));
    let is_quota_exceeded = api_status == Some("RESOURCE_EXHAUSTED");

    let code = if is_quota_exceeded || is_rate_limit {
        ErrorCode::RateLimit
    } else if is_auth {
        ErrorCode::AuthenticationError
    } else {
        ProviderError::from_status(status, message.clone()).code()
    };
    ProviderError::Classified {
        code,
        message,
        status: Some(status),
    }
}

async fn map_gemini_error(resp: reqwest::Response) -> ProviderError {
    let status = resp.status().as_u16();
    match resp.text().await {
        Ok(body) => {
            let parsed = serde_json::from_str::<serde_json::Value>(&body).ok();
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("error"))
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| body.clone());
            let api_status = parsed
                .as_ref()
                .and_then(|v| v.get("error"))
                .and_then(|e| e.get("status"))
                .and_then(|s| s.as_str())
                .map(|s| s.to_string());
            classify_error(status, api_status.as_deref(), message)
        }
        Err(_) => ProviderError::from_status(status, "failed to read error response"),
    }
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let started = Instant::now();
        let model = self.resolve_model(request);
        let body = self.build_body(request);
        let path = self.generate_path(&model, false);

        let raw = self.http.post_json_raw(cancel, &path, &body).await;
        let raw = match raw {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let err = map_gemini_error(r).await;
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

        let parsed: GeminiResponse = raw.json().await?;
        self.healthy.store(true, Ordering::Relaxed);
        self.metrics.record(true, started);

        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
            ProviderError::classified(ErrorCode::InvalidRequest, "gemini response had no candidates")
        })?;
        let content = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed
            .usage_metadata
            .map(|u| UsageStats::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        let finish_reason = map_finish_reason(candidate.finish_reason);
        if finish_reason == FinishReason::ContentFilter {
            return Err(content_filter_err(&model));
        }
        Ok(CompletionResponse {
            content,
            model,
            usage,
            latency: started.elapsed(),
            finish_reason,
            metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
        })
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
        let body = self.build_body(request);
        let path = self.generate_path(&model, true);

        let response = self.http.post_json_raw_streaming(cancel, &path, &body).await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let err = map_gemini_error(r).await;
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
        let mut usage: Option<GeminiUsage> = None;
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
                let Ok(parsed) = serde_json::from_str::<GeminiResponse>(payload) else {
                    continue;
                };
                if let Some(candidate) = parsed.candidates.into_iter().next() {
                    let text = candidate
                        .content
                        .parts
                        .into_iter()
                        .map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("");
                    if !text.is_empty() {
                        content.push_str(&text);
                        handler(crate::models::StreamChunk::content(text))?;
                    }
                    if candidate.finish_reason.is_some() {
                        finish_reason = candidate.finish_reason;
                    }
                }
                if parsed.usage_metadata.is_some() {
                    usage = parsed.usage_metadata;
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
            usage: usage
                .map(|u| UsageStats::new(u.prompt_token_count, u.candidates_token_count))
                .unwrap_or_default(),
            latency: started.elapsed(),
            finish_reason,
            metadata: HashMap::from([("provider".to_string(), self.name.clone())]),
        })
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<HealthCheckResult, ProviderError> {
        let started = Instant::now();
        let result = self
            .http
            .get_json::<serde_json::Value>(cancel, &format!("/{API_VERSION}/models"))
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
            ProviderCapability::Vision,
            ProviderCapability::LongContext,
        ]
    }

    fn estimate_cost(&self, request: &CompletionRequest) -> Option<CostEstimate> {
        let (input, output) = estimate_tokens(request);
        let (input_rate, output_rate) = (0.00125, 0.005);
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
    fn map_finish_reason_covers_closed_set() {
        assert_eq!(map_finish_reason(Some("STOP".to_string())), FinishReason::Stop);
        assert_eq!(map_finish_reason(Some("MAX_TOKENS".to_string())), FinishReason::MaxTokens);
        assert_eq!(map_finish_reason(Some("SAFETY".to_string())), FinishReason::ContentFilter);
        assert_eq!(map_finish_reason(Some("RECITATION".to_string())), FinishReason::ContentFilter);
    }

    #[test]
    fn content_filter_err_carries_content_filter_code() {
        let err = content_filter_err("gemini-1.5-pro");
        assert_eq!(err.code(), ErrorCode::ContentFilter);
        assert!(!err.retryable());
    }

    #[test]
    fn classify_error_detects_quota_exceeded_as_rate_limit() {
        let err = classify_error(429, Some("RESOURCE_EXHAUSTED"), "quota".to_string());
        assert_eq!(err.code(), ErrorCode::RateLimit);
    }

    #[test]
    fn classify_error_detects_auth_by_status_string() {
        let err = classify_error(400, Some("UNAUTHENTICATED"), "bad creds".to_string());
        assert_eq!(err.code(), ErrorCode::AuthenticationError);
    }

    #[test]
    fn build_body_includes_system_instruction() {
        let config = crate::models::ProviderConfig::new("gem", ProviderType::Gemini)
            .with_api_key("key");
        let provider = GeminiProvider::new(config).unwrap();
        let req = CompletionRequest {
            system_prompt: Some("be terse".to_string()),
            ..Default::default()
        };
        let body = provider.build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
    }

    #[test]
    fn generate_path_switches_on_stream() {
        let config = crate::models::ProviderConfig::new("gem", ProviderType::Gemini)
            .with_api_key("key");
        let provider = GeminiProvider::new(config).unwrap();
        assert!(provider.generate_path("gemini-1.5-pro", true).ends_with(":streamGenerateContent?alt=sse"));
        assert!(provider.generate_path("gemini-1.5-pro", false).ends_with(":generateContent"));
    }
}
