//! # Factory & Factory Manager
//!
//! A factory is a named constructor `ProviderType → (ProviderConfig) →
//! Provider`. The [`FactoryManager`] holds the `ProviderType → factory`
//! mapping under a reader/writer lock (§4.7); a process-wide default
//! manager exists and the built-in adapters register themselves into it at
//! startup via [`register_builtin_factories`]. Isolated test harnesses can
//! seed a fresh manager from the global set with [`FactoryManager::copy_from_global`]
//! rather than depending on global mutable state directly (see §9's
//! "Global mutable factory registry" re-architecture note).

use crate::error::{ErrorCode, GatewayError, ProviderError};
use crate::models::{ProviderConfig, ProviderType};
use crate::providers::Provider;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

pub type ProviderFactory =
    Arc<dyn Fn(ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Named constructors keyed by the provider type they build.
pub struct FactoryManager {
    factories: RwLock<HashMap<ProviderType, ProviderFactory>>,
}

impl Default for FactoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FactoryManager {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, provider_type: ProviderType, factory: ProviderFactory) {
        self.factories
            .write()
            .expect("factory manager lock poisoned")
            .insert(provider_type, factory);
    }

    pub fn unregister(&self, provider_type: &ProviderType) -> bool {
        self.factories
            .write()
            .expect("factory manager lock poisoned")
            .remove(provider_type)
            .is_some()
    }

    pub fn has(&self, provider_type: &ProviderType) -> bool {
        self.factories
            .read()
            .expect("factory manager lock poisoned")
            .contains_key(provider_type)
    }

    pub fn list(&self) -> Vec<ProviderType> {
        self.factories
            .read()
            .expect("factory manager lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.factories
            .read()
            .expect("factory manager lock poisoned")
            .len()
    }

    pub fn clear(&self) {
        self.factories
            .write()
            .expect("factory manager lock poisoned")
            .clear();
    }

    /// Seeds `self` with every factory currently registered in the
    /// process-wide default manager. Intended for test harnesses that want
    /// an isolated manager without re-declaring every built-in adapter.
    pub fn copy_from_global(&self) {
        let global = default_manager();
        let entries: Vec<(ProviderType, ProviderFactory)> = global
            .factories
            .read()
            .expect("factory manager lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut ours = self.factories.write().expect("factory manager lock poisoned");
        for (provider_type, factory) in entries {
            ours.insert(provider_type, factory);
        }
    }

    /// Validates a config before construction (§4.7): nonempty name and
    /// type, hosted-type auth requirements, Bedrock's region requirement,
    /// and the shared weight/priority/timeout/rate-limit bounds.
    pub fn validate(config: &ProviderConfig) -> Result<(), GatewayError> {
        let invalid = |message: String| {
            GatewayError::classified(ErrorCode::FactoryInvalidConfig, message)
        };

        if config.name.trim().is_empty() {
            return Err(invalid("provider config name must not be empty".to_string()));
        }
        match &config.provider_type {
            ProviderType::OpenAI | ProviderType::Anthropic | ProviderType::Gemini | ProviderType::AzureOpenAI => {
                if config.api_key.is_none() && config.api_key_secret_arn.is_none() {
                    return Err(invalid(format!(
                        "provider '{}' of type {} requires an api key or api key secret ARN",
                        config.name, config.provider_type
                    )));
                }
            }
            ProviderType::Bedrock => {
                if config.region.is_none() {
                    return Err(invalid(format!(
                        "provider '{}' of type bedrock requires a region",
                        config.name
                    )));
                }
            }
            ProviderType::Ollama => {}
            ProviderType::Custom(_) => {}
        }
        if config.weight > 100 {
            return Err(invalid(format!(
                "provider '{}' weight {} exceeds 100",
                config.name, config.weight
            )));
        }
        Ok(())
    }

    /// Constructs a provider from `config` per the §4.7 contract:
    /// `missing_type` is unreachable at the type level (the type is
    /// always present on `ProviderConfig`), so the remaining failures are
    /// `not_registered` and `creation_failed`.
    pub fn create(&self, config: ProviderConfig) -> Result<Arc<dyn Provider>, GatewayError> {
        Self::validate(&config)?;

        let factory = {
            let guard = self.factories.read().expect("factory manager lock poisoned");
            guard.get(&config.provider_type).cloned()
        };
        let factory = factory.ok_or_else(|| {
            GatewayError::classified(
                ErrorCode::FactoryNotRegistered,
                format!("no factory registered for provider type {}", config.provider_type),
            )
        })?;

        factory(config).map_err(|err| {
            GatewayError::classified(
                ErrorCode::FactoryCreationFailed,
                format!("provider construction failed: {err}"),
            )
        })
    }
}

fn global_cell() -> &'static OnceLock<Arc<FactoryManager>> {
    static GLOBAL: OnceLock<Arc<FactoryManager>> = OnceLock::new();
    &GLOBAL
}

/// The process-wide default manager. Built-in adapters are registered into
/// it lazily on first access.
pub fn default_manager() -> Arc<FactoryManager> {
    global_cell()
        .get_or_init(|| {
            let manager = Arc::new(FactoryManager::new());
            register_builtin_factories(&manager);
            manager
        })
        .clone()
}

/// Registers every built-in adapter's constructor into `manager`. Callers
/// composing their own manager (rather than using [`default_manager`])
/// call this explicitly to opt into the built-in set.
pub fn register_builtin_factories(manager: &FactoryManager) {
    manager.register(
        ProviderType::OpenAI,
        Arc::new(|config| {
            crate::providers::openai::OpenAIProvider::new(config)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
        }),
    );
    manager.register(
        ProviderType::Anthropic,
        Arc::new(|config| {
            crate::providers::anthropic::AnthropicProvider::new(config)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
        }),
    );
    manager.register(
        ProviderType::Gemini,
        Arc::new(|config| {
            crate::providers::gemini::GeminiProvider::new(config)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
        }),
    );
    manager.register(
        ProviderType::Ollama,
        Arc::new(|config| {
            crate::providers::ollama::OllamaProvider::new(config)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
        }),
    );
    manager.register(
        ProviderType::Bedrock,
        Arc::new(|config| {
            crate::providers::bedrock::BedrockProvider::new(config)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
        }),
    );
    manager.register(
        ProviderType::AzureOpenAI,
        Arc::new(|config| {
            crate::providers::azure::AzureOpenAIProvider::new(config)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
        }),
    );
    manager.register(
        ProviderType::Custom("custom".to_string()),
        Arc::new(|config| {
            crate::providers::custom::CustomProvider::new(config)
                .map(|p| Arc::new(p) as Arc<dyn Provider>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_name() {
        let config = ProviderConfig::new("", ProviderType::OpenAI).with_api_key("k");
        assert!(FactoryManager::validate(&config).is_err());
    }

    #[test]
    fn validate_requires_api_key_for_hosted_types() {
        let config = ProviderConfig::new("oai", ProviderType::OpenAI);
        let err = FactoryManager::validate(&config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FactoryInvalidConfig);
    }

    #[test]
    fn validate_requires_region_for_bedrock() {
        let config = ProviderConfig::new("br", ProviderType::Bedrock).with_api_key("k");
        assert!(FactoryManager::validate(&config).is_err());
        let config = ProviderConfig::new("br", ProviderType::Bedrock)
            .with_api_key("k")
            .with_region("us-east-1");
        assert!(FactoryManager::validate(&config).is_ok());
    }

    #[test]
    fn validate_allows_ollama_with_no_required_fields() {
        let config = ProviderConfig::new("local", ProviderType::Ollama);
        assert!(FactoryManager::validate(&config).is_ok());
    }

    #[test]
    fn create_fails_not_registered_for_unknown_custom_tag() {
        let manager = FactoryManager::new();
        register_builtin_factories(&manager);
        let config = ProviderConfig::new("c1", ProviderType::Custom("unregistered-tag".to_string()))
            .with_endpoint("http://localhost:9000");
        let err = manager.create(config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FactoryNotRegistered);
    }

    #[test]
    fn create_succeeds_for_registered_type() {
        let manager = FactoryManager::new();
        register_builtin_factories(&manager);
        let config = ProviderConfig::new("o1", ProviderType::OpenAI).with_api_key("sk-test");
        let provider = manager.create(config).unwrap();
        assert_eq!(provider.name(), "o1");
    }

    #[test]
    fn copy_from_global_seeds_built_ins() {
        let _ = default_manager();
        let manager = FactoryManager::new();
        manager.copy_from_global();
        assert!(manager.has(&ProviderType::OpenAI));
        assert!(manager.has(&ProviderType::Bedrock));
    }
}
