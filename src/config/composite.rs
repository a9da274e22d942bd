//! Chains providers; earlier providers win.

use super::ConfigResult;
use super::provider::ConfigProvider;

/// Chained providers, highest priority first.
#[derive(Default)]
pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `provider` at the lowest priority.
    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for CompositeConfigProvider {
    fn name(&self) -> &str {
        "composite"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        for provider in &self.providers {
            if let Some(value) = provider.get_raw(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for CompositeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeConfigProvider")
            .field("providers", &self.provider_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::memory::MemoryConfigProvider;

    #[tokio::test]
    async fn test_first_provider_wins() {
        let explicit = MemoryConfigProvider::named("explicit").value("git.username", "alice");
        let fallback = MemoryConfigProvider::named("fallback")
            .value("git.username", "bob")
            .value("git.password", "from-fallback");

        let composite = CompositeConfigProvider::new()
            .provider(Box::new(explicit))
            .provider(Box::new(fallback));

        assert_eq!(
            composite.get_raw("git.username").await.unwrap().as_deref(),
            Some("alice")
        );
        assert_eq!(
            composite.get_raw("git.password").await.unwrap().as_deref(),
            Some("from-fallback")
        );
    }

    #[tokio::test]
    async fn test_empty_composite() {
        let composite = CompositeConfigProvider::new();
        assert_eq!(composite.get_raw("any").await.unwrap(), None);
        assert!(composite.provider_names().is_empty());
    }
}
