//! In-memory configuration provider for code-defined settings and tests.

use std::collections::HashMap;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug, Clone)]
pub struct MemoryConfigProvider {
    data: HashMap<String, String>,
    name: String,
}

impl Default for MemoryConfigProvider {
    fn default() -> Self {
        Self::named("memory")
    }
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            data: HashMap::new(),
            name: name.into(),
        }
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data.get(key).cloned())
    }
}
