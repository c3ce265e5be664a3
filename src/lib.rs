//! # Ultrafast Models SDK
//!
//! A Rust SDK for routing completions across multiple LLM providers through
//! a single uniform interface. Every provider family — OpenAI, Anthropic,
//! Gemini, Bedrock, Azure OpenAI, Ollama, and arbitrary OpenAI-compatible
//! "custom" endpoints — is reached through the same [`providers::Provider`]
//! trait, so call sites never branch on which upstream they're talking to.
//!
//! ## Overview
//!
//! - [`models`]: the uniform request/response/config shapes every module
//!   shares — `CompletionRequest`, `CompletionResponse`, `ProviderConfig`,
//!   `ProviderType`, health and streaming types.
//! - [`providers`]: the [`providers::Provider`] trait and the concrete
//!   adapter for each provider family.
//! - [`factory`]: named constructors `ProviderType → Provider`, held in a
//!   [`factory::FactoryManager`] with a process-wide default.
//! - [`license`]: tier-based gating of which provider types may be
//!   registered.
//! - [`storage`]: the persistence contract the registry uses to survive a
//!   restart, plus an in-memory reference implementation.
//! - [`registry`]: the name → config/provider/health-result store, with
//!   lazy instantiation and background reload/health-check loops.
//! - [`strategy`]: weighted-random, round-robin, and failover provider
//!   selection over a registry's healthy set.
//! - [`config`]: environment-variable loading for the routing strategy.
//! - [`router`]: the façade tying registry, strategy, and request-context
//!   adaptation together into one `route` call.
//! - [`error`]: the [`error::ErrorCode`] taxonomy and the
//!   [`error::ProviderError`]/[`error::GatewayError`] error types.
//! - [`common`]: the token/cost estimation heuristic shared by every hosted
//!   adapter.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use ultrafast_models_sdk::factory::default_manager;
//! use ultrafast_models_sdk::license::DefaultLicenseValidator;
//! use ultrafast_models_sdk::models::{ProviderConfig, ProviderType};
//! use ultrafast_models_sdk::registry::Registry;
//! use ultrafast_models_sdk::router::{Router, RequestContext};
//! use ultrafast_models_sdk::strategy::{RoutingStrategyKind, Strategy};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(Registry::new(
//!     default_manager(),
//!     Arc::new(DefaultLicenseValidator::default()),
//!     None,
//! ));
//!
//! let cancel = CancellationToken::new();
//! registry
//!     .register(
//!         &cancel,
//!         ProviderConfig::new("primary-openai", ProviderType::OpenAI)
//!             .with_api_key("sk-...")
//!             .with_weight(100),
//!     )
//!     .await?;
//!
//! registry.health_check(&cancel).await;
//!
//! let strategy = Strategy::new(RoutingStrategyKind::WeightedRandom, Default::default(), None);
//! let router = Router::new(registry, strategy, None);
//!
//! let ctx = RequestContext {
//!     query: "Summarize the attached log.".to_string(),
//!     ..Default::default()
//! };
//! let (_response, _route_info) = router.route(&cancel, &ctx).await?;
//! # Ok(())
//! # }
//! ```
//!
pub mod common;
pub mod config;
pub mod error;
pub mod factory;
pub mod license;
pub mod models;
pub mod providers;
pub mod registry;
pub mod router;
pub mod storage;
pub mod strategy;

pub use error::{ErrorCode, GatewayError, ProviderError};
pub use factory::FactoryManager;
pub use models::{
    CompletionRequest, CompletionResponse, CostEstimate, HealthCheckResult, HealthStatus,
    ProviderCapability, ProviderConfig, ProviderType, RouteInfo, StreamChunk,
};
pub use providers::Provider;
pub use registry::Registry;
pub use router::{RequestContext, Router};
pub use strategy::{RoutingStrategyKind, Strategy};
