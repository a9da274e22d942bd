//! Environment variable configuration provider.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// View of the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    prefix: Option<String>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// `git.password` becomes `{PREFIX}GIT_PASSWORD`.
    fn env_key(&self, key: &str) -> String {
        let key = key.to_uppercase().replace(['.', '-'], "_");
        match &self.prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key,
        }
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }
}
