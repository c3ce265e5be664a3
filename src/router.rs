//! # Unified Router
//!
//! The router is the thin façade an application actually calls: it glues a
//! [`Registry`] to a [`Strategy`], adapts caller-facing request contexts
//! into the uniform [`CompletionRequest`], and reports provenance alongside
//! every response via [`RouteInfo`] (§4.11).

use crate::error::GatewayError;
use crate::models::{CompletionRequest, CompletionResponse, RouteInfo};
use crate::registry::Registry;
use crate::strategy::{RoutingStrategyKind, Strategy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A caller-facing request, before it's been adapted into a
/// [`CompletionRequest`]. `role` and `system_prompt` feed the §6 system
/// prompt synthesis rule; the rest carry through into `metadata` for
/// observability.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub query: String,
    pub system_prompt: Option<String>,
    pub role: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub model: Option<String>,
    pub request_type: Option<String>,
    pub client_id: Option<String>,
    pub org_id: Option<String>,
    pub tenant_id: Option<String>,
}

/// Adapts a [`RequestContext`] into the uniform completion request every
/// adapter consumes (§6). System prompt precedence: explicit value, else a
/// role-flavored default when a role is present, else the generic default.
pub fn adapt_request_context(ctx: &RequestContext) -> CompletionRequest {
    let system_prompt = ctx.system_prompt.clone().or_else(|| {
        Some(match &ctx.role {
            Some(role) => format!("You are an AI assistant. User Role: {role}"),
            None => "You are an AI assistant helping with user queries.".to_string(),
        })
    });

    let mut metadata = HashMap::new();
    if let Some(v) = &ctx.request_type {
        metadata.insert("request-type".to_string(), v.clone());
    }
    if let Some(v) = &ctx.role {
        metadata.insert("user-role".to_string(), v.clone());
    }
    if let Some(v) = &ctx.client_id {
        metadata.insert("client-id".to_string(), v.clone());
    }
    if let Some(v) = &ctx.org_id {
        metadata.insert("org-id".to_string(), v.clone());
    }
    if let Some(v) = &ctx.tenant_id {
        metadata.insert("tenant-id".to_string(), v.clone());
    }

    CompletionRequest {
        prompt: ctx.query.clone(),
        system_prompt,
        max_tokens: ctx.max_tokens.unwrap_or(0),
        temperature: ctx.temperature.unwrap_or(-1.0),
        model: ctx.model.clone(),
        metadata,
        ..Default::default()
    }
}

pub struct Router {
    registry: Arc<Registry>,
    strategy: Strategy,
    health_check_cancel: Option<CancellationToken>,
    health_check_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Router {
    /// Builds a router over `registry`/`strategy`. When
    /// `health_check_interval` is given, starts the registry's periodic
    /// health check immediately, owned by this router's lifetime.
    pub fn new(
        registry: Arc<Registry>,
        strategy: Strategy,
        health_check_interval: Option<Duration>,
    ) -> Self {
        let (health_check_cancel, health_check_handle) = match health_check_interval {
            Some(interval) => {
                let cancel = CancellationToken::new();
                let handle = registry.start_periodic_health_check(cancel.clone(), interval);
                (Some(cancel), Some(handle))
            }
            None => (None, None),
        };
        Self {
            registry,
            strategy,
            health_check_cancel,
            health_check_handle,
        }
    }

    pub fn routing_strategy_kind(&self) -> RoutingStrategyKind {
        self.strategy.kind()
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.strategy.default_provider()
    }

    pub fn weights(&self) -> &HashMap<String, f64> {
        self.strategy.weights()
    }

    pub async fn register(
        &self,
        cancel: &CancellationToken,
        config: crate::models::ProviderConfig,
    ) -> Result<(), GatewayError> {
        self.registry.register(cancel, config).await
    }

    pub async fn enable(&self, name: &str) -> Result<(), GatewayError> {
        self.registry.set_enabled(name, true).await
    }

    pub async fn disable(&self, name: &str) -> Result<(), GatewayError> {
        self.registry.set_enabled(name, false).await
    }

    pub async fn list(&self) -> Vec<String> {
        self.registry.list().await
    }

    pub async fn list_enabled(&self) -> Vec<String> {
        self.registry.list_enabled().await
    }

    pub async fn list_healthy(&self) -> Vec<String> {
        self.registry.get_healthy_providers().await
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn crate::providers::Provider>, GatewayError> {
        self.registry.get(name).await
    }

    /// True iff at least one provider is currently healthy.
    pub async fn is_healthy(&self) -> bool {
        !self.registry.get_healthy_providers().await.is_empty()
    }

    /// Adapts `ctx`, selects a healthy provider, and completes the request.
    pub async fn route(
        &self,
        cancel: &CancellationToken,
        ctx: &RequestContext,
    ) -> Result<(CompletionResponse, RouteInfo), GatewayError> {
        self.route_completion(cancel, &adapt_request_context(ctx)).await
    }

    /// Same as [`Self::route`] but skips request-context adaptation.
    pub async fn route_completion(
        &self,
        cancel: &CancellationToken,
        request: &CompletionRequest,
    ) -> Result<(CompletionResponse, RouteInfo), GatewayError> {
        let healthy = self.registry.get_healthy_providers().await;
        let chosen = self
            .strategy
            .select(&healthy)
            .ok_or_else(|| GatewayError::unavailable("no healthy providers available"))?;

        let provider = self.registry.get(&chosen).await?;
        let started = Instant::now();
        let response = provider.complete(cancel, request).await?;
        let estimated_cost = provider
            .estimate_cost(request)
            .map(|c| c.total_estimate)
            .unwrap_or(0.0);

        let route_info = RouteInfo {
            provider_name: chosen,
            provider_type: provider.provider_type(),
            model: response.model.clone(),
            response_time: started.elapsed(),
            tokens_used: response.usage.total_tokens,
            estimated_cost,
        };
        Ok((response, route_info))
    }

    /// Cancels the background health-check loop, if this router owns one.
    pub async fn close(&mut self) {
        if let Some(cancel) = self.health_check_cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.health_check_handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapt_uses_explicit_system_prompt_when_present() {
        let ctx = RequestContext {
            query: "hi".to_string(),
            system_prompt: Some("custom prompt".to_string()),
            role: Some("admin".to_string()),
            ..Default::default()
        };
        let req = adapt_request_context(&ctx);
        assert_eq!(req.system_prompt.as_deref(), Some("custom prompt"));
    }

    #[test]
    fn adapt_uses_role_flavored_default_when_no_explicit_prompt() {
        let ctx = RequestContext {
            query: "hi".to_string(),
            role: Some("billing-agent".to_string()),
            ..Default::default()
        };
        let req = adapt_request_context(&ctx);
        assert_eq!(
            req.system_prompt.as_deref(),
            Some("You are an AI assistant. User Role: billing-agent")
        );
    }

    #[test]
    fn adapt_uses_generic_default_with_no_role_or_prompt() {
        let ctx = RequestContext {
            query: "hi".to_string(),
            ..Default::default()
        };
        let req = adapt_request_context(&ctx);
        assert_eq!(
            req.system_prompt.as_deref(),
            Some("You are an AI assistant helping with user queries.")
        );
    }

    #[test]
    fn adapt_carries_metadata_fields() {
        let ctx = RequestContext {
            query: "hi".to_string(),
            request_type: Some("chat".to_string()),
            client_id: Some("client-1".to_string()),
            org_id: Some("org-1".to_string()),
            tenant_id: Some("tenant-1".to_string()),
            role: Some("user".to_string()),
            ..Default::default()
        };
        let req = adapt_request_context(&ctx);
        assert_eq!(req.metadata.get("request-type"), Some(&"chat".to_string()));
        assert_eq!(req.metadata.get("client-id"), Some(&"client-1".to_string()));
        assert_eq!(req.metadata.get("org-id"), Some(&"org-1".to_string()));
        assert_eq!(req.metadata.get("tenant-id"), Some(&"tenant-1".to_string()));
        assert_eq!(req.metadata.get("user-role"), Some(&"user".to_string()));
    }
}
