//! # Provider Registry
//!
//! The registry is the gateway's single source of truth for "what
//! providers exist and are they up": a name → config map, a name →
//! instantiated-provider map, and a separately-locked name → health-result
//! cache (§4.9). Providers are instantiated lazily — `register` only ever
//! stores a config; the first `get` call builds the instance via the
//! injected [`FactoryManager`] and every later `get` hands back the same
//! `Arc`.
//!
//! Lock ordering is load-bearing: `state` (configs + providers) is always
//! acquired before `health_results`, and released before `health_results`
//! is taken, whenever an operation needs both. [`Registry::close`] follows
//! the same rule.

use crate::error::GatewayError;
use crate::factory::FactoryManager;
use crate::license::LicenseValidator;
use crate::models::{HealthCheckResult, HealthStatus, ProviderConfig, ProviderType};
use crate::providers::Provider;
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct RegistryState {
    configs: HashMap<String, ProviderConfig>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

pub struct Registry {
    state: RwLock<RegistryState>,
    health_results: RwLock<HashMap<String, HealthCheckResult>>,
    factory_manager: Arc<FactoryManager>,
    license_validator: Arc<dyn LicenseValidator>,
    storage: Option<Arc<dyn Storage>>,
}

impl Registry {
    pub fn new(
        factory_manager: Arc<FactoryManager>,
        license_validator: Arc<dyn LicenseValidator>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                configs: HashMap::new(),
                providers: HashMap::new(),
            }),
            health_results: RwLock::new(HashMap::new()),
            factory_manager,
            license_validator,
            storage,
        }
    }

    /// Registers a config without instantiating a provider. Validates,
    /// license-checks, rejects duplicate names, then upserts into storage
    /// (if configured); a storage failure rolls back the in-memory insert.
    pub async fn register(
        &self,
        cancel: &CancellationToken,
        config: ProviderConfig,
    ) -> Result<(), GatewayError> {
        FactoryManager::validate(&config)?;
        self.license_validator.check(&config.provider_type)?;

        let mut state = self.state.write().await;
        if state.configs.contains_key(&config.name) || state.providers.contains_key(&config.name) {
            return Err(GatewayError::duplicate(&config.name));
        }
        state.configs.insert(config.name.clone(), config.clone());

        if let Some(storage) = &self.storage {
            if let Err(err) = storage.save_provider(cancel, &config).await {
                state.configs.remove(&config.name);
                return Err(GatewayError::Storage(err.to_string()));
            }
        }
        Ok(())
    }

    /// Registers a pre-instantiated provider. Duplicate detection is
    /// against the providers map; `config` is stored alongside it when
    /// given, so later `get_config`/`list_by_type` calls see it.
    pub async fn register_provider(
        &self,
        provider: Arc<dyn Provider>,
        config: Option<ProviderConfig>,
    ) -> Result<(), GatewayError> {
        let name = provider.name().to_string();
        let mut state = self.state.write().await;
        if state.providers.contains_key(&name) {
            return Err(GatewayError::duplicate(&name));
        }
        if let Some(config) = config {
            state.configs.insert(name.clone(), config);
        }
        state.providers.insert(name, provider);
        Ok(())
    }

    /// Returns the instantiated provider for `name`, lazily constructing
    /// it from a stored config on first access.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Provider>, GatewayError> {
        {
            let state = self.state.read().await;
            if let Some(provider) = state.providers.get(name) {
                return Ok(provider.clone());
            }
        }

        let mut state = self.state.write().await;
        if let Some(provider) = state.providers.get(name) {
            return Ok(provider.clone());
        }
        let config = state
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(name))?;
        let provider = self.factory_manager.create(config)?;
        state.providers.insert(name.to_string(), provider.clone());
        Ok(provider)
    }

    pub async fn unregister(&self, cancel: &CancellationToken, name: &str) -> Result<(), GatewayError> {
        {
            let state = self.state.read().await;
            if !state.configs.contains_key(name) && !state.providers.contains_key(name) {
                return Err(GatewayError::not_found(name));
            }
        }
        if let Some(storage) = &self.storage {
            match storage.delete_provider(cancel, name).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    provider = name,
                    "storage had no record of provider during unregister, proceeding with in-memory removal"
                ),
                Err(err) => tracing::warn!(
                    provider = name,
                    error = %err,
                    "storage delete_provider failed during unregister, proceeding with in-memory removal"
                ),
            }
        }
        {
            let mut state = self.state.write().await;
            state.configs.remove(name);
            state.providers.remove(name);
        }
        {
            let mut health = self.health_results.write().await;
            health.remove(name);
        }
        Ok(())
    }

    pub async fn get_config(&self, name: &str) -> Option<ProviderConfig> {
        self.state.read().await.configs.get(name).cloned()
    }

    /// Toggles the `enabled` bit on a stored config. Not persisted through
    /// storage automatically (§4.11) — callers that need that upsert the
    /// config through storage themselves.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        let config = state
            .configs
            .get_mut(name)
            .ok_or_else(|| GatewayError::not_found(name))?;
        config.enabled = enabled;
        Ok(())
    }

    pub async fn list(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: std::collections::BTreeSet<String> = state.configs.keys().cloned().collect();
        names.extend(state.providers.keys().cloned());
        names.into_iter().collect()
    }

    pub async fn list_enabled(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for (name, config) in &state.configs {
            if config.enabled {
                names.insert(name.clone());
            }
        }
        for name in state.providers.keys() {
            if !state.configs.contains_key(name) {
                names.insert(name.clone());
            }
        }
        names.into_iter().collect()
    }

    pub async fn list_by_type(&self, provider_type: &ProviderType) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for (name, config) in &state.configs {
            if &config.provider_type == provider_type {
                names.insert(name.clone());
            }
        }
        for (name, provider) in &state.providers {
            if !state.configs.contains_key(name) && &provider.provider_type() == provider_type {
                names.insert(name.clone());
            }
        }
        names.into_iter().collect()
    }

    pub async fn count(&self) -> usize {
        self.list().await.len()
    }

    pub async fn count_instantiated(&self) -> usize {
        self.state.read().await.providers.len()
    }

    pub async fn has(&self, name: &str) -> bool {
        let state = self.state.read().await;
        state.configs.contains_key(name) || state.providers.contains_key(name)
    }

    /// Health-checks every currently-instantiated provider. Providers that
    /// only exist as configs (never `get`-ed) are not included — they have
    /// no live instance to check.
    pub async fn health_check(
        &self,
        cancel: &CancellationToken,
    ) -> HashMap<String, HealthCheckResult> {
        let snapshot: Vec<(String, Arc<dyn Provider>)> = {
            let state = self.state.read().await;
            state
                .providers
                .iter()
                .map(|(name, provider)| (name.clone(), provider.clone()))
                .collect()
        };

        let mut results = HashMap::with_capacity(snapshot.len());
        for (name, provider) in snapshot {
            let result = match provider.health(cancel).await {
                Ok(result) => result,
                Err(err) => HealthCheckResult::unhealthy(err.to_string()),
            };
            results.insert(name, result);
        }

        let mut health = self.health_results.write().await;
        for (name, result) in &results {
            health.insert(name.clone(), result.clone());
        }
        results
    }

    pub async fn health_check_single(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<HealthCheckResult, GatewayError> {
        let provider = self.get(name).await?;
        let result = match provider.health(cancel).await {
            Ok(result) => result,
            Err(err) => HealthCheckResult::unhealthy(err.to_string()),
        };
        self.health_results
            .write()
            .await
            .insert(name.to_string(), result.clone());
        Ok(result)
    }

    pub async fn get_health_result(&self, name: &str) -> Option<HealthCheckResult> {
        self.health_results.read().await.get(name).cloned()
    }

    pub async fn get_healthy_providers(&self) -> Vec<String> {
        let health = self.health_results.read().await;
        let mut names: Vec<String> = health
            .iter()
            .filter(|(_, result)| result.status == HealthStatus::Healthy)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Pulls configs from storage that aren't already present locally.
    /// No-op when no storage is configured. Per-name fetch failures are
    /// logged and skipped; a failure to list names at all is surfaced.
    pub async fn reload_from_storage(&self, cancel: &CancellationToken) -> Result<(), GatewayError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let names = storage
            .list_all_providers(cancel)
            .await
            .map_err(|err| GatewayError::Storage(err.to_string()))?;

        for name in names {
            let already_present = {
                let state = self.state.read().await;
                state.configs.contains_key(&name) || state.providers.contains_key(&name)
            };
            if already_present {
                continue;
            }
            match storage.get_provider(cancel, &name).await {
                Ok(Some(config)) => {
                    self.state.write().await.configs.insert(name, config);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(provider = %name, error = %err, "reload_from_storage: per-name fetch failed, skipping");
                }
            }
        }
        Ok(())
    }

    /// Clears all in-memory state. Instantiated providers are not closed —
    /// they own their own lifecycle.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.configs.clear();
        state.providers.clear();
        drop(state);
        self.health_results.write().await.clear();
    }
}

impl Registry {
    /// Spawns a background task that ticks `interval` and calls
    /// `reload_from_storage` until `cancel` fires.
    pub fn start_periodic_reload(
        self: &Arc<Self>,
        cancel: CancellationToken,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = registry.reload_from_storage(&cancel).await {
                            tracing::warn!(error = %err, "periodic reload_from_storage failed");
                        }
                    }
                }
            }
        })
    }

    /// Spawns a background task that ticks `interval` and calls
    /// `health_check` until `cancel` fires.
    pub fn start_periodic_health_check(
        self: &Arc<Self>,
        cancel: CancellationToken,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.health_check(&cancel).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::register_builtin_factories;
    use crate::license::DefaultLicenseValidator;
    use crate::models::ProviderType;
    use crate::storage::InMemoryStorage;

    fn fresh_registry(storage: Option<Arc<dyn Storage>>) -> Registry {
        let factory_manager = Arc::new(FactoryManager::new());
        register_builtin_factories(&factory_manager);
        Registry::new(
            factory_manager,
            Arc::new(DefaultLicenseValidator::default()),
            storage,
        )
    }

    #[tokio::test]
    async fn register_then_list_contains_name() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        registry.register(&cancel, config).await.unwrap();
        assert!(registry.has("p1").await);
        assert_eq!(registry.list().await, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_register_fails() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        registry.register(&cancel, config.clone()).await.unwrap();
        let err = registry.register(&cancel, config).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::RegistryDuplicate);
    }

    #[tokio::test]
    async fn get_lazily_instantiates_and_is_stable() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        registry.register(&cancel, config).await.unwrap();
        assert_eq!(registry.count_instantiated().await, 0);

        let first = registry.get("p1").await.unwrap();
        assert_eq!(registry.count_instantiated().await, 1);
        let second = registry.get("p1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn get_unknown_name_is_not_found() {
        let registry = fresh_registry(None);
        let err = registry.get("missing").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::RegistryNotFound);
    }

    #[tokio::test]
    async fn unregister_removes_from_all_tables() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        registry.register(&cancel, config).await.unwrap();
        registry.get("p1").await.unwrap();
        registry.unregister(&cancel, "p1").await.unwrap();
        assert!(!registry.has("p1").await);
        assert_eq!(registry.count_instantiated().await, 0);
    }

    #[tokio::test]
    async fn unregister_unknown_fails() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        let err = registry.unregister(&cancel, "missing").await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::RegistryNotFound);
    }

    #[tokio::test]
    async fn count_tracks_register_and_unregister() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        for name in ["a", "b", "c"] {
            let config = ProviderConfig::new(name, ProviderType::OpenAI).with_api_key("k");
            registry.register(&cancel, config).await.unwrap();
        }
        assert_eq!(registry.count().await, 3);
        registry.unregister(&cancel, "a").await.unwrap();
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn license_gating_rejects_professional_tier_types() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("b1", ProviderType::Bedrock)
            .with_api_key("k")
            .with_region("us-east-1");
        let err = registry.register(&cancel, config).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::RegistryLicenseRequired);
    }

    #[tokio::test]
    async fn reload_from_storage_picks_up_unseen_configs() {
        let storage = Arc::new(InMemoryStorage::new());
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        storage.save_provider(&cancel, &config).await.unwrap();

        let registry = fresh_registry(Some(storage));
        assert!(!registry.has("p1").await);
        registry.reload_from_storage(&cancel).await.unwrap();
        assert!(registry.has("p1").await);
    }

    #[tokio::test]
    async fn reload_from_storage_is_noop_without_storage() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        assert!(registry.reload_from_storage(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn close_clears_everything() {
        let registry = fresh_registry(None);
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        registry.register(&cancel, config).await.unwrap();
        registry.get("p1").await.unwrap();
        registry.close().await;
        assert_eq!(registry.count().await, 0);
        assert_eq!(registry.count_instantiated().await, 0);
    }
}
