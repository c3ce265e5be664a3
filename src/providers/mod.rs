//! # Provider Abstraction
//!
//! Every upstream LLM family is reached through one trait: [`Provider`].
//! Adapters own their own HTTP translation, streaming parse, and a small
//! `healthy` bit flipped by the transition rules in each adapter's
//! `execute`/`health` paths (5xx and transport failures mark a provider
//! unhealthy; 4xx does not; a successful call marks it healthy again).
//!
//! ```rust
//! use ultrafast_models_sdk::providers::Provider;
//! use ultrafast_models_sdk::models::{CompletionRequest, ProviderCapability};
//!
//! async fn describe(p: &dyn Provider) {
//!     println!("{} supports streaming: {}", p.name(), p.supports_streaming());
//!     let _ = p.capabilities().contains(&ProviderCapability::Chat);
//! }
//! ```

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod custom;
pub mod gemini;
pub mod http_client;
pub mod ollama;
pub mod openai;

use crate::error::ProviderError;
use crate::models::{CompletionRequest, CompletionResponse, CostEstimate, HealthCheckResult, ProviderCapability, StreamChunk};
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub type StreamResult = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// A callback invoked once per chunk of a streamed completion. Returning an
/// error aborts the stream; the terminal `done` chunk is skipped in that
/// case.
pub type ChunkHandler = Box<dyn FnMut(StreamChunk) -> Result<(), ProviderError> + Send>;

/// The capability set every adapter implements. Cloning a provider is not
/// supported; the registry hands out `Arc<dyn Provider>` handles instead.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier for this instance's lifetime.
    fn name(&self) -> &str;

    fn provider_type(&self) -> crate::models::ProviderType;

    /// Execute a unary completion. Never retries internally; classification
    /// of the failure is the caller's job via [`ProviderError::retryable`].
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Execute a streamed completion, invoking `handler` once per chunk and
    /// once more with a terminal `done` chunk on success.
    ///
    /// Default implementation rejects streaming for adapters that don't
    /// support it; streaming adapters override this.
    async fn complete_stream(
        &self,
        _cancel: &CancellationToken,
        _request: &CompletionRequest,
        _handler: ChunkHandler,
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::FeatureNotSupported {
            feature: "streaming".to_string(),
        })
    }

    async fn health(&self, cancel: &CancellationToken) -> Result<HealthCheckResult, ProviderError>;

    fn capabilities(&self) -> Vec<ProviderCapability>;

    fn supports_streaming(&self) -> bool {
        self.capabilities().contains(&ProviderCapability::Streaming)
    }

    /// `None` when the adapter has no known per-1K pricing (self-hosted).
    fn estimate_cost(&self, request: &CompletionRequest) -> Option<CostEstimate>;

    /// Performance counters for this instance; ambient, not gated by any
    /// spec operation, exposed read-only for observability.
    fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics::default()
    }
}

/// Exponential-moving-average performance counters, tracked per adapter
/// instance. `alpha` matches the smoothing constant used across this
/// codebase's other EMA.
#[derive(Debug, Default)]
pub struct ProviderMetricsInner {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    average_latency_ms_bits: AtomicU64,
}

const EMA_ALPHA: f64 = 0.1;

impl ProviderMetricsInner {
    pub fn record(&self, success: bool, started: Instant) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let latency_ms = started.elapsed().as_millis() as f64;
        let prev = f64::from_bits(self.average_latency_ms_bits.load(Ordering::Relaxed));
        let next = EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * prev;
        self.average_latency_ms_bits
            .store(next.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProviderMetrics {
        ProviderMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            average_latency_ms: f64::from_bits(self.average_latency_ms_bits.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
}

impl ProviderMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}
