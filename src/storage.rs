//! # Persistent Configuration Storage
//!
//! The registry treats persistence as an external collaborator: [`Storage`]
//! is the whole contract (§6). The core never depends on *how* configs are
//! persisted, only that `SaveProvider` upserts, `GetProvider` can report
//! "not found", and listing can optionally be scoped to an organization.
//!
//! [`InMemoryStorage`] is a `Storage` impl used by this crate's own tests
//! and suitable as a starting point for a real backing store; it is not a
//! substitute for one in production.

use crate::error::GatewayError;
use crate::models::ProviderConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_provider(
        &self,
        cancel: &CancellationToken,
        config: &ProviderConfig,
    ) -> Result<(), GatewayError>;

    /// `Ok(None)` when no config is stored under `name`; callers that need
    /// the §6 "not found" behavior distinguish it from a transport error.
    async fn get_provider(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Option<ProviderConfig>, GatewayError>;

    /// `Ok(true)` if a config under `name` was deleted, `Ok(false)` when
    /// `name` was already absent, per §6 (`DeleteProvider(ctx, name) →
    /// notfound on missing`).
    async fn delete_provider(&self, cancel: &CancellationToken, name: &str) -> Result<bool, GatewayError>;

    /// Names scoped to `org_id`; implementations free to ignore
    /// multi-tenancy may treat this the same as `list_all_providers`.
    async fn list_providers(
        &self,
        cancel: &CancellationToken,
        org_id: &str,
    ) -> Result<Vec<String>, GatewayError>;

    async fn list_all_providers(&self, cancel: &CancellationToken) -> Result<Vec<String>, GatewayError>;
}

/// A `Storage` backed by an in-process map. Reference implementation and
/// test double; every entry is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    configs: RwLock<HashMap<String, ProviderConfig>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_provider(
        &self,
        _cancel: &CancellationToken,
        config: &ProviderConfig,
    ) -> Result<(), GatewayError> {
        self.configs
            .write()
            .await
            .insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn get_provider(
        &self,
        _cancel: &CancellationToken,
        name: &str,
    ) -> Result<Option<ProviderConfig>, GatewayError> {
        Ok(self.configs.read().await.get(name).cloned())
    }

    async fn delete_provider(&self, _cancel: &CancellationToken, name: &str) -> Result<bool, GatewayError> {
        Ok(self.configs.write().await.remove(name).is_some())
    }

    async fn list_providers(
        &self,
        cancel: &CancellationToken,
        _org_id: &str,
    ) -> Result<Vec<String>, GatewayError> {
        self.list_all_providers(cancel).await
    }

    async fn list_all_providers(&self, _cancel: &CancellationToken) -> Result<Vec<String>, GatewayError> {
        let mut names: Vec<String> = self.configs.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderType;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let storage = InMemoryStorage::new();
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        storage.save_provider(&cancel, &config).await.unwrap();
        let fetched = storage.get_provider(&cancel, "p1").await.unwrap();
        assert_eq!(fetched.unwrap().name, "p1");
    }

    #[tokio::test]
    async fn get_missing_returns_none_not_error() {
        let storage = InMemoryStorage::new();
        let cancel = CancellationToken::new();
        let fetched = storage.get_provider(&cancel, "absent").await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn delete_missing_reports_not_found() {
        let storage = InMemoryStorage::new();
        let cancel = CancellationToken::new();
        assert_eq!(storage.delete_provider(&cancel, "absent").await.unwrap(), false);
    }

    #[tokio::test]
    async fn delete_present_reports_deleted() {
        let storage = InMemoryStorage::new();
        let cancel = CancellationToken::new();
        let config = ProviderConfig::new("p1", ProviderType::OpenAI).with_api_key("k");
        storage.save_provider(&cancel, &config).await.unwrap();
        assert_eq!(storage.delete_provider(&cancel, "p1").await.unwrap(), true);
        assert!(storage.get_provider(&cancel, "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_all_is_sorted() {
        let storage = InMemoryStorage::new();
        let cancel = CancellationToken::new();
        for name in ["zebra", "alpha", "mid"] {
            let config = ProviderConfig::new(name, ProviderType::OpenAI).with_api_key("k");
            storage.save_provider(&cancel, &config).await.unwrap();
        }
        let names = storage.list_all_providers(&cancel).await.unwrap();
        assert_eq!(names, vec!["alpha", "mid", "zebra"]);
    }
}
